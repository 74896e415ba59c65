use dnssd_client::{
    Connection, ServiceBrowser, ServiceResolver, ServiceTypeBrowser,
};
use dnssd_mdns::MdnsGateway;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

type Browsers = Arc<Mutex<HashMap<String, ServiceBrowser>>>;
type Resolvers = Arc<Mutex<HashMap<String, ServiceResolver>>>;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!(
        "mdns-browse from {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let connection = Connection::open(MdnsGateway::new()?)?;
    println!(
        "{} on {}",
        connection.version()?,
        connection.host_name_fqdn()?
    );

    let browsers: Browsers = Arc::default();
    let resolvers: Resolvers = Arc::default();
    let types = ServiceTypeBrowser::new(&connection)?;

    let conn = connection.downgrade();
    let b2 = browsers.clone();
    types.add_found_listener(move |t| {
        println!("type {}", t.service_type);
        let browser =
            ServiceBrowser::in_domain(&conn, &t.service_type, &t.domain);
        let conn = conn.clone();
        let r2 = resolvers.clone();
        let added = browser.add_found_listener(move |s| {
            let resolver = ServiceResolver::for_service(&conn, s);
            let added = resolver.add_found_listener(|r| {
                println!(
                    "  {} ({}) at {}:{} {:?}",
                    r.name,
                    r.service_type,
                    r.host_name.as_deref().unwrap_or("?"),
                    r.port,
                    r.address
                );
            });
            match added {
                Ok(_) => {
                    if let Ok(mut resolvers) = r2.lock() {
                        resolvers.insert(s.name.clone(), resolver);
                    }
                }
                Err(e) => println!("  cannot resolve {}: {e}", s.name),
            }
        });
        if let Err(e) = added {
            println!("cannot browse {}: {e}", t.service_type);
            return;
        }
        if let Ok(mut browsers) = b2.lock() {
            browsers.insert(t.service_type.clone(), browser);
        }
    })?;

    loop {
        std::thread::park();
    }
}
