use crate::connection::ConnectionRef;
use crate::error::Result;
use crate::event::{
    DomainBrowserType, DomainInfo, Interface, Protocol, ServiceInfo,
    ServiceTypeInfo,
};
use crate::gateway::{Record, Request};
use crate::listener::ListenerId;
use crate::query::{sealed::Sealed, Browse, Lookup, Query};
use std::sync::Arc;

#[cfg(feature = "async")]
use crate::stream::ListenerStream;

/// Marker for [`DomainBrowser`]
#[derive(Debug)]
pub enum BrowseDomains {}

/// Marker for [`ServiceTypeBrowser`]
#[derive(Debug)]
pub enum BrowseServiceTypes {}

/// Marker for [`ServiceBrowser`]
#[derive(Debug)]
pub enum BrowseServices {}

impl Sealed for BrowseDomains {}
impl Sealed for BrowseServiceTypes {}
impl Sealed for BrowseServices {}

impl Lookup for BrowseDomains {
    type Item = DomainInfo;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<DomainInfo> {
        match record {
            Record::Domain { domain } => Some(DomainInfo {
                interface,
                protocol,
                domain,
            }),
            _ => None,
        }
    }
}

impl Lookup for BrowseServiceTypes {
    type Item = ServiceTypeInfo;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<ServiceTypeInfo> {
        match record {
            Record::ServiceType {
                service_type,
                domain,
            } => Some(ServiceTypeInfo {
                interface,
                protocol,
                service_type,
                domain,
            }),
            _ => None,
        }
    }
}

impl Lookup for BrowseServices {
    type Item = ServiceInfo;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<ServiceInfo> {
        match record {
            Record::Service {
                name,
                service_type,
                domain,
            } => Some(ServiceInfo::new(
                interface,
                protocol,
                &name,
                &service_type,
                &domain,
            )),
            _ => None,
        }
    }
}

/** A query which accumulates a set of discoveries
 *
 * A browser does nothing until its first listener is added; then it
 * subscribes, and reports each discovery to its "found" listeners and
 * each departure to its "removed" listeners. Its current set of
 * discoveries, in order of arrival, is also available at any time.
 * When the last listener is removed, it unsubscribes again (and a
 * later listener starts a fresh browse, with an empty set).
 *
 * Listeners are called on the connection's event-loop thread, in the
 * order in which they were added.
 *
 * Concrete browsers are [`DomainBrowser`], [`ServiceTypeBrowser`], and
 * [`ServiceBrowser`].
 */
pub struct Browser<L: Lookup> {
    query: Query<Browse<L>>,
}

/// Browses for domains
pub type DomainBrowser = Browser<BrowseDomains>;

/// Browses for service types
pub type ServiceTypeBrowser = Browser<BrowseServiceTypes>;

/// Browses for instances of one service type
pub type ServiceBrowser = Browser<BrowseServices>;

impl<L: Lookup> Browser<L> {
    fn with_request(connection: ConnectionRef, request: Request) -> Self {
        Self {
            query: Query::new(connection, request),
        }
    }

    /// Add a listener for discoveries, starting the browse if needed
    ///
    /// # Errors
    ///
    /// If the browse cannot be started, the listener is not added and
    /// the session's error is returned.
    pub fn add_found_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&L::Item) + Send + Sync + 'static,
    {
        self.query.add_found_listener(Arc::new(listener))
    }

    /// Add a listener for departures, starting the browse if needed
    ///
    /// Departures are reported even for items which were never
    /// reported as found.
    ///
    /// # Errors
    ///
    /// As for [`Browser::add_found_listener`].
    pub fn add_removed_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&L::Item) + Send + Sync + 'static,
    {
        self.query.add_lost_listener(Arc::new(listener))
    }

    /// Remove a discovery listener; stops the browse if it was the last
    /// listener of either kind
    ///
    /// Returns whether it was found.
    pub fn remove_found_listener(&self, id: ListenerId) -> bool {
        self.query.remove_found_listener(id)
    }

    /// Remove a departure listener; stops the browse if it was the last
    /// listener of either kind
    ///
    /// Returns whether it was found.
    pub fn remove_removed_listener(&self, id: ListenerId) -> bool {
        self.query.remove_lost_listener(id)
    }

    /// Everything currently discovered, in order of discovery
    #[must_use]
    pub fn items(&self) -> Vec<L::Item> {
        self.query.with_results(Clone::clone)
    }

    /// Whether the browse is currently subscribed
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.query.is_active()
    }

    /// Stop the browse, whether or not it has listeners
    ///
    /// Listeners stay registered, and adding another one restarts the
    /// browse. Disposing twice is harmless; dropping the browser
    /// disposes it.
    pub fn dispose(&self) {
        self.query.dispose();
    }

    /// What this browser subscribes to
    #[must_use]
    pub fn request(&self) -> &Request {
        self.query.request()
    }

    /// Discoveries as an asynchronous stream
    ///
    /// # Errors
    ///
    /// As for [`Browser::add_found_listener`].
    #[cfg(feature = "async")]
    pub fn found_stream(&self) -> Result<ListenerStream<L::Item>> {
        self.query.found_stream()
    }

    /// Departures as an asynchronous stream
    ///
    /// # Errors
    ///
    /// As for [`Browser::add_found_listener`].
    #[cfg(feature = "async")]
    pub fn removed_stream(&self) -> Result<ListenerStream<L::Item>> {
        self.query.lost_stream()
    }
}

impl Browser<BrowseDomains> {
    /// Browse for browsing domains in the connection's default domain
    ///
    /// # Errors
    ///
    /// Fails if the default domain cannot be determined.
    pub fn new(connection: impl Into<ConnectionRef>) -> Result<Self> {
        let connection = connection.into();
        let domain = connection.default_domain()?;
        Ok(Self::with_scope(
            connection,
            Interface::Any,
            Protocol::Unspecified,
            &domain,
            DomainBrowserType::Browse,
        ))
    }

    /// Browse for domains, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        domain: &str,
        browse_type: DomainBrowserType,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::Domains {
                interface,
                protocol,
                domain: domain.to_string(),
                browse_type,
            },
        )
    }

    /// Domains currently discovered
    #[must_use]
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.items()
    }
}

impl Browser<BrowseServiceTypes> {
    /// Browse for service types in the connection's default domain
    ///
    /// # Errors
    ///
    /// Fails if the default domain cannot be determined.
    pub fn new(connection: impl Into<ConnectionRef>) -> Result<Self> {
        let connection = connection.into();
        let domain = connection.default_domain()?;
        Ok(Self::in_domain(connection, &domain))
    }

    /// Browse for service types in a particular domain
    pub fn in_domain(connection: impl Into<ConnectionRef>, domain: &str) -> Self {
        Self::with_scope(connection, Interface::Any, Protocol::Unspecified, domain)
    }

    /// Browse for service types, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        domain: &str,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::ServiceTypes {
                interface,
                protocol,
                domain: domain.to_string(),
            },
        )
    }

    /// Service types currently discovered
    #[must_use]
    pub fn service_types(&self) -> Vec<ServiceTypeInfo> {
        self.items()
    }
}

impl Browser<BrowseServices> {
    /// Browse for services of type `service_type` (e.g. "_http._tcp")
    /// in the connection's default domain
    ///
    /// # Errors
    ///
    /// Fails if the default domain cannot be determined.
    pub fn new(
        connection: impl Into<ConnectionRef>,
        service_type: &str,
    ) -> Result<Self> {
        let connection = connection.into();
        let domain = connection.default_domain()?;
        Ok(Self::in_domain(connection, service_type, &domain))
    }

    /// Browse for services of a type in a particular domain
    pub fn in_domain(
        connection: impl Into<ConnectionRef>,
        service_type: &str,
        domain: &str,
    ) -> Self {
        Self::with_scope(
            connection,
            Interface::Any,
            Protocol::Unspecified,
            service_type,
            domain,
        )
    }

    /// Browse for services, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        service_type: &str,
        domain: &str,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::Services {
                interface,
                protocol,
                service_type: service_type.to_string(),
                domain: domain.to_string(),
            },
        )
    }

    /// Services currently discovered
    #[must_use]
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.items()
    }
}
