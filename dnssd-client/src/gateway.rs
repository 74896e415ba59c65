use crate::entry_group::{EntryGroupState, ServiceEntry};
use crate::error::{Error, ErrorCode};
use crate::event::{ClientState, DomainBrowserType, Interface, Protocol};
use std::net::IpAddr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

slotmap::new_key_type! {
    /// Identifies one active subscription on a connection
    ///
    /// Keys are never reused while a connection is open, so a
    /// notification carrying the key of a subscription which has
    /// since been cancelled can always be recognised as stale.
    pub struct SubscriptionKey;
}

/// What a subscription asks the discovery session to look for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    /// Browse for domains
    Domains {
        /// Interface to browse on
        interface: Interface,
        /// Protocol to browse over
        protocol: Protocol,
        /// Domain in which to look for further domains
        domain: String,
        /// Which kind of domain to look for
        browse_type: DomainBrowserType,
    },

    /// Browse for service types
    ServiceTypes {
        /// Interface to browse on
        interface: Interface,
        /// Protocol to browse over
        protocol: Protocol,
        /// Domain to browse in
        domain: String,
    },

    /// Browse for instances of one service type
    Services {
        /// Interface to browse on
        interface: Interface,
        /// Protocol to browse over
        protocol: Protocol,
        /// Service type, e.g. "_http._tcp"
        service_type: String,
        /// Domain to browse in
        domain: String,
    },

    /// Resolve one service instance to host, address, port and TXT
    ResolveService {
        /// Interface to resolve on
        interface: Interface,
        /// Protocol to resolve over
        protocol: Protocol,
        /// Instance name
        name: String,
        /// Service type
        service_type: String,
        /// Domain
        domain: String,
        /// Protocol of the address wanted in the answer
        address_protocol: Protocol,
    },

    /// Resolve a host name to an address
    ResolveHostName {
        /// Interface to resolve on
        interface: Interface,
        /// Protocol to resolve over
        protocol: Protocol,
        /// Host name, e.g. "printer.local"
        host_name: String,
        /// Protocol of the address wanted in the answer
        address_protocol: Protocol,
    },

    /// Resolve an address back to a host name
    ResolveAddress {
        /// Interface to resolve on
        interface: Interface,
        /// Protocol to resolve over
        protocol: Protocol,
        /// Address to look up
        address: IpAddr,
    },
}

impl Request {
    /// Short name of the request's kind, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domains { .. } => "domains",
            Self::ServiceTypes { .. } => "service-types",
            Self::Services { .. } => "services",
            Self::ResolveService { .. } => "resolve-service",
            Self::ResolveHostName { .. } => "resolve-host-name",
            Self::ResolveAddress { .. } => "resolve-address",
        }
    }
}

/// The payload of a discovery notification, before it is scoped to
/// an interface and protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Record {
    /// A domain
    Domain {
        /// Domain name
        domain: String,
    },

    /// A service type
    ServiceType {
        /// Service type, e.g. "_http._tcp"
        service_type: String,
        /// Domain
        domain: String,
    },

    /// A service instance, unresolved
    Service {
        /// Instance name
        name: String,
        /// Service type
        service_type: String,
        /// Domain
        domain: String,
    },

    /// A service instance, resolved
    ResolvedService {
        /// Instance name
        name: String,
        /// Service type
        service_type: String,
        /// Domain
        domain: String,
        /// Target host name
        host_name: String,
        /// Target address, if one of the wanted protocol was found
        address: Option<IpAddr>,
        /// Target port
        port: u16,
        /// TXT record strings
        text: Vec<Vec<u8>>,
    },

    /// A host name and one of its addresses
    HostAddress {
        /// Host name
        host_name: String,
        /// Address
        address: IpAddr,
    },
}

/// What happened, as reported by the discovery session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawEvent {
    /// Something new was found (or, for resolvers, resolved)
    Found(Record),

    /// Something previously found has gone away
    Removed(Record),

    /// A resolver gave up, or its answer went away
    Timeout,
}

/// A discovery notification, as delivered to one subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notification {
    /// Interface on which the event was seen
    pub interface: Interface,
    /// Protocol over which the event was seen
    pub protocol: Protocol,
    /// What happened
    pub event: RawEvent,
}

/// Work which the discovery session has ready for the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The session changed state
    StateChanged(ClientState),

    /// A notification for one subscription
    Notification(SubscriptionKey, Notification),

    /// An entry group changed state
    GroupStateChanged(SubscriptionKey, EntryGroupState),
}

/// Outcome of a [`Poller::wait`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wait {
    /// The session may have work ready; call [`Gateway::dispatch`]
    Ready,

    /// The connection is closing; the loop should exit
    Quit,
}

/// The blocking half of a discovery session
///
/// A connection's event loop calls `wait` repeatedly from its own
/// thread, *without* holding the connection's lock, so that other
/// threads can subscribe and unsubscribe meanwhile. The other two
/// methods may be called from any thread.
#[cfg_attr(test, automock)]
pub trait Poller: Send + Sync {
    /// Block until the session has work, or until `wakeup` or `quit`
    /// is called
    ///
    /// # Errors
    ///
    /// An error here is fatal to the connection: the loop exits and
    /// the connection reports [`ClientState::Disconnected`].
    fn wait(&self) -> Result<Wait, Error>;

    /// Make a concurrent (or the next) `wait` return promptly
    fn wakeup(&self);

    /// Make every future `wait` return [`Wait::Quit`]
    fn quit(&self);
}

/// A discovery session, as seen by a [`Connection`](crate::Connection)
///
/// This is the seam between the query machinery in this crate and
/// whatever actually performs discovery: a system daemon, an
/// in-process mDNS responder, or a scripted test double such as
/// [`LoopbackGateway`](crate::LoopbackGateway).
///
/// Every method is called with the connection's lock held, so no two
/// calls ever overlap.
#[cfg_attr(test, automock)]
pub trait Gateway: Send {
    /// Why the session could not be established, if it could not
    fn open_error(&self) -> Option<ErrorCode> {
        None
    }

    /// Current session state
    fn state(&self) -> ClientState;

    /// This host's name, e.g. "myhost"
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn host_name(&self) -> Result<String, ErrorCode>;

    /// This host's default domain, e.g. "local"
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn domain_name(&self) -> Result<String, ErrorCode>;

    /// This host's fully-qualified name, e.g. "myhost.local"
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn host_name_fqdn(&self) -> Result<String, ErrorCode>;

    /// Version string of whatever performs discovery
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn version(&self) -> Result<String, ErrorCode>;

    /// The most recent failure reported by the session
    fn last_error(&self) -> Option<ErrorCode>;

    /// Start delivering notifications for `request`, tagged with `key`
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session; no
    /// notifications are then delivered for `key`.
    fn subscribe(
        &mut self,
        key: SubscriptionKey,
        request: &Request,
    ) -> Result<(), ErrorCode>;

    /// Stop delivering notifications for `key`
    ///
    /// If `key` names an entry group, the group is freed and anything
    /// it published is withdrawn.
    fn unsubscribe(&mut self, key: SubscriptionKey);

    /// Create an empty, uncommitted entry group, tagged with `key`
    ///
    /// # Errors
    ///
    /// [`ErrorCode::NotSupported`] unless the session can publish.
    fn new_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let _ = key;
        Err(ErrorCode::NotSupported)
    }

    /// Add a service to an uncommitted entry group
    ///
    /// An `entry` without a domain goes in the session's default one.
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn add_service(
        &mut self,
        key: SubscriptionKey,
        entry: &ServiceEntry,
    ) -> Result<(), ErrorCode> {
        let _ = (key, entry);
        Err(ErrorCode::NotSupported)
    }

    /// Start publishing an entry group's services
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn commit_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let _ = key;
        Err(ErrorCode::NotSupported)
    }

    /// Withdraw and forget an entry group's services
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn reset_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let _ = key;
        Err(ErrorCode::NotSupported)
    }

    /// Current state of an entry group
    ///
    /// # Errors
    ///
    /// Passes on any failure reported by the session.
    fn group_state(
        &self,
        key: SubscriptionKey,
    ) -> Result<EntryGroupState, ErrorCode> {
        let _ = key;
        Err(ErrorCode::NotSupported)
    }

    /// The session's blocking half
    fn poller(&self) -> Arc<dyn Poller>;

    /// Collect whatever work is ready, without blocking
    fn dispatch(&mut self) -> Vec<Delivery>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_debug() {
        let e = format!("{:?}", RawEvent::Timeout);
        assert_eq!(e, "Timeout".to_string());
    }

    #[test]
    fn request_kinds() {
        let r = Request::ServiceTypes {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            domain: "local".to_string(),
        };
        assert_eq!(r.kind(), "service-types");
        let r = Request::ResolveAddress {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            address: IpAddr::from([192, 0, 2, 5]),
        };
        assert_eq!(r.kind(), "resolve-address");
    }
}
