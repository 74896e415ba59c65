//! Browsing and resolving DNS-SD services
//!
//! The dnssd-client crate is the client side of DNS Service Discovery
//! (DNS-SD, RFC 6763), as usually carried over multicast DNS (mDNS,
//! RFC 6762): the mechanism by which printers, file servers, media
//! players and the like announce themselves on local networks, under
//! names such as "Kitchen printer" of type "_ipp._tcp" in domain
//! "local".
//!
//! Discovery proper is delegated to a *discovery session*, reached
//! through the [`Gateway`] trait; the companion crate `dnssd-mdns`
//! provides one which speaks mDNS itself, and [`LoopbackGateway`]
//! provides a scripted one for tests. On top of that, this crate
//! provides:
//!
//!  - [`Connection`], which owns a session and runs a background
//!    thread which dispatches the session's notifications;
//!
//!  - three browsers, [`DomainBrowser`], [`ServiceTypeBrowser`], and
//!    [`ServiceBrowser`], each of which accumulates a set of
//!    discoveries and reports arrivals and departures to listeners;
//!
//!  - three resolvers, [`ServiceResolver`], [`HostNameResolver`], and
//!    [`AddressResolver`], each of which tracks a single answer.
//!
//!  - [`EntryGroup`], which publishes services of our own.
//!
//! Browsers and resolvers are lazy: they subscribe to the session
//! only while they have at least one listener. Listeners can also be
//! consumed as asynchronous streams, with the `async` feature (on by
//! default).
//!
//! ```no_run
//! use dnssd_client::{Connection, LoopbackGateway, ServiceBrowser};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (gateway, _injector) = LoopbackGateway::new()?;
//! let connection = Connection::open(gateway)?;
//! let browser = ServiceBrowser::new(&connection, "_http._tcp")?;
//! browser.add_found_listener(|service| {
//!     println!("found {} in {}", service.name, service.domain);
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod alternative;
mod browser;
mod connection;
mod entry_group;
mod error;
mod event;
mod gateway;
mod listener;
mod loopback;
mod query;
mod resolver;

#[cfg(feature = "async")]
mod stream;

pub use alternative::{alternative_host_name, alternative_service_name};
pub use browser::{
    BrowseDomains, BrowseServiceTypes, BrowseServices, Browser, DomainBrowser,
    ServiceBrowser, ServiceTypeBrowser,
};
pub use connection::{Connection, ConnectionConfig, ConnectionRef};
pub use entry_group::{
    EntryGroup, EntryGroupState, PublishFlags, ServiceEntry,
};
pub use error::{describe, Error, ErrorCode, Result};
pub use event::{
    ClientState, DomainBrowserType, DomainInfo, HostAddress, Interface,
    Protocol, ServiceInfo, ServiceTypeInfo,
};
pub use gateway::{
    Delivery, Gateway, Notification, Poller, RawEvent, Record, Request,
    SubscriptionKey, Wait,
};
pub use listener::ListenerId;
pub use loopback::{Injector, LoopbackGateway, PublishedGroup};
pub use query::Lookup;
pub use resolver::{
    AddressResolver, HostNameResolver, ResolveAddress, ResolveHostName,
    ResolveService, Resolver, ServiceResolver,
};

#[cfg(feature = "async")]
pub use stream::ListenerStream;

/// Lock a mutex, ignoring poisoning
pub(crate) fn lock<T>(
    mutex: &std::sync::Mutex<T>,
) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
