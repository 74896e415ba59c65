//! A discovery session for dnssd-client which speaks multicast DNS
//!
//! [`MdnsGateway`] implements `dnssd_client::Gateway` on top of the
//! [mdns-sd](https://crates.io/crates/mdns-sd) crate's in-process
//! daemon, so that browsers and resolvers work without any system
//! discovery service.
//!
//! ```no_run
//! use dnssd_client::{Connection, ServiceBrowser};
//! use dnssd_mdns::MdnsGateway;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = Connection::open(MdnsGateway::new()?)?;
//! let browser = ServiceBrowser::new(&connection, "_http._tcp")?;
//! browser.add_found_listener(|service| println!("found {}", service.name))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod daemon;
mod gateway;
mod names;
mod poller;

pub use gateway::{Error, MdnsConfig, MdnsGateway};
