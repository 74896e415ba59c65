use dnssd_client::{
    Connection, Interface, LoopbackGateway, Notification, Protocol, RawEvent,
    Record, Request, ServiceBrowser, ServiceResolver,
};
use std::collections::HashMap;
use std::error::Error;
use std::net::IpAddr;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!(
        "browse-loopback from {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let (gateway, injector) = LoopbackGateway::new()?;
    let connection = Connection::open(gateway)?;
    println!("connected to {}", connection.version()?);

    let browser = ServiceBrowser::new(&connection, "_http._tcp")?;
    let resolvers = Arc::new(Mutex::new(HashMap::new()));
    let (done_tx, done_rx) = mpsc::channel();

    let conn = connection.downgrade();
    let r2 = resolvers.clone();
    browser.add_found_listener(move |service| {
        println!("+ {} ({})", service.name, service.service_type);
        let resolver = ServiceResolver::for_service(&conn, service);
        let done_tx = done_tx.clone();
        let added = resolver.add_found_listener(move |resolved| {
            println!(
                "  {} is at {:?} port {}",
                resolved.name, resolved.address, resolved.port
            );
            let _ = done_tx.send(());
        });
        if let Err(e) = added {
            println!("  cannot resolve {}: {e}", service.name);
            return;
        }
        r2.lock().unwrap().insert(service.name.clone(), resolver);
    })?;

    let r3 = resolvers.clone();
    browser.add_removed_listener(move |service| {
        println!("- {}", service.name);
        r3.lock().unwrap().remove(&service.name);
    })?;

    // Play the part of the network
    injector.notify(
        |r| matches!(r, Request::Services { .. }),
        &Notification {
            interface: Interface::Index(1),
            protocol: Protocol::Ipv4,
            event: RawEvent::Found(Record::Service {
                name: "Web server".to_string(),
                service_type: "_http._tcp".to_string(),
                domain: "local".to_string(),
            }),
        },
    );
    std::thread::sleep(Duration::from_millis(100));
    injector.notify(
        |r| matches!(r, Request::ResolveService { .. }),
        &Notification {
            interface: Interface::Index(1),
            protocol: Protocol::Ipv4,
            event: RawEvent::Found(Record::ResolvedService {
                name: "Web server".to_string(),
                service_type: "_http._tcp".to_string(),
                domain: "local".to_string(),
                host_name: "web.local".to_string(),
                address: Some(IpAddr::from([192, 0, 2, 80])),
                port: 8080,
                text: vec![b"path=/".to_vec()],
            }),
        },
    );
    done_rx.recv_timeout(Duration::from_secs(5))?;

    println!("services: {:?}", browser.services());
    resolvers.lock().unwrap().clear();
    Ok(())
}
