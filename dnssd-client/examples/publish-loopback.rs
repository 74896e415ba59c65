use dnssd_client::{
    Connection, EntryGroup, EntryGroupState, LoopbackGateway, ServiceEntry,
};
use std::error::Error;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!(
        "publish-loopback from {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let (gateway, injector) = LoopbackGateway::new()?;
    let connection = Connection::open(gateway)?;
    let group = Arc::new(EntryGroup::new(&connection)?);
    let entry = Arc::new(Mutex::new(
        ServiceEntry::new("Web server", "_http._tcp", 8080).with_txt("path=/"),
    ));
    let (done_tx, done_rx) = mpsc::channel();

    let weak = Arc::downgrade(&group);
    let e2 = entry.clone();
    group.add_state_listener(move |state| {
        println!("group is {state:?}");
        match state {
            EntryGroupState::Collision => {
                let Some(group) = weak.upgrade() else {
                    return;
                };
                let mut entry = e2.lock().unwrap();
                *entry = entry.alternative();
                println!("renaming to {}", entry.name);
                let retried = group
                    .reset()
                    .and_then(|()| group.add_service(&entry))
                    .and_then(|()| group.commit());
                if let Err(e) = retried {
                    println!("cannot republish: {e}");
                }
            }
            EntryGroupState::Established => {
                let _ = done_tx.send(());
            }
            _ => {}
        }
    });

    group.add_service(&entry.lock().unwrap())?;
    group.commit()?;

    // Play the part of the network: the first name is taken
    std::thread::sleep(Duration::from_millis(100));
    let key = injector.groups()[0].key;
    injector.set_group_state(key, EntryGroupState::Collision);
    std::thread::sleep(Duration::from_millis(100));
    injector.set_group_state(key, EntryGroupState::Established);
    done_rx.recv_timeout(Duration::from_secs(5))?;

    for published in injector.groups() {
        for service in published.services {
            println!("published {} on port {}", service.name, service.port);
        }
    }
    Ok(())
}
