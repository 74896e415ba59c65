use crate::connection::ConnectionRef;
use crate::error::Result;
use crate::event::{HostAddress, Interface, Protocol, ServiceInfo};
use crate::gateway::{Record, Request};
use crate::listener::ListenerId;
use crate::query::{sealed::Sealed, Lookup, Query, Resolve};
use std::net::IpAddr;
use std::sync::Arc;

#[cfg(feature = "async")]
use crate::stream::ListenerStream;

/// Marker for [`ServiceResolver`]
#[derive(Debug)]
pub enum ResolveService {}

/// Marker for [`HostNameResolver`]
#[derive(Debug)]
pub enum ResolveHostName {}

/// Marker for [`AddressResolver`]
#[derive(Debug)]
pub enum ResolveAddress {}

impl Sealed for ResolveService {}
impl Sealed for ResolveHostName {}
impl Sealed for ResolveAddress {}

impl Lookup for ResolveService {
    type Item = ServiceInfo;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<ServiceInfo> {
        match record {
            Record::ResolvedService {
                name,
                service_type,
                domain,
                host_name,
                address,
                port,
                text,
            } => Some(ServiceInfo {
                interface,
                protocol,
                name,
                service_type,
                domain,
                host_name: Some(host_name),
                address,
                port,
                text,
            }),
            _ => None,
        }
    }
}

fn decode_host_address(
    interface: Interface,
    protocol: Protocol,
    record: Record,
) -> Option<HostAddress> {
    match record {
        Record::HostAddress { host_name, address } => Some(HostAddress {
            interface,
            protocol,
            host_name,
            address,
        }),
        _ => None,
    }
}

impl Lookup for ResolveHostName {
    type Item = HostAddress;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<HostAddress> {
        decode_host_address(interface, protocol, record)
    }
}

impl Lookup for ResolveAddress {
    type Item = HostAddress;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<HostAddress> {
        decode_host_address(interface, protocol, record)
    }
}

/** A query which tracks a single answer
 *
 * Like a [`Browser`](crate::Browser), a resolver does nothing until
 * its first listener is added, and stops when its last listener is
 * removed. While active, it reports each answer to its "found"
 * listeners and remembers the latest one; if the answer times out or
 * goes away, the remembered answer is cleared and the "timeout"
 * listeners are told.
 *
 * Concrete resolvers are [`ServiceResolver`], [`HostNameResolver`],
 * and [`AddressResolver`].
 */
pub struct Resolver<L: Lookup> {
    query: Query<Resolve<L>>,
}

/// Resolves a service instance to host, address, port, and TXT record
pub type ServiceResolver = Resolver<ResolveService>;

/// Resolves a host name to an address
pub type HostNameResolver = Resolver<ResolveHostName>;

/// Resolves an address back to a host name
pub type AddressResolver = Resolver<ResolveAddress>;

impl<L: Lookup> Resolver<L> {
    fn with_request(connection: ConnectionRef, request: Request) -> Self {
        Self {
            query: Query::new(connection, request),
        }
    }

    /// Add a listener for answers, starting resolution if needed
    ///
    /// # Errors
    ///
    /// If resolution cannot be started, the listener is not added and
    /// the session's error is returned.
    pub fn add_found_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&L::Item) + Send + Sync + 'static,
    {
        self.query.add_found_listener(Arc::new(listener))
    }

    /// Add a listener for timeouts, starting resolution if needed
    ///
    /// # Errors
    ///
    /// As for [`Resolver::add_found_listener`].
    pub fn add_timeout_listener<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.query.add_lost_listener(Arc::new(move |_: &()| listener()))
    }

    /// Remove an answer listener; stops resolution if it was the last
    /// listener of either kind
    ///
    /// Returns whether it was found.
    pub fn remove_found_listener(&self, id: ListenerId) -> bool {
        self.query.remove_found_listener(id)
    }

    /// Remove a timeout listener; stops resolution if it was the last
    /// listener of either kind
    ///
    /// Returns whether it was found.
    pub fn remove_timeout_listener(&self, id: ListenerId) -> bool {
        self.query.remove_lost_listener(id)
    }

    /// The latest answer, unless it has since timed out
    #[must_use]
    pub fn result(&self) -> Option<L::Item> {
        self.query.with_results(Clone::clone)
    }

    /// Whether resolution is currently subscribed
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.query.is_active()
    }

    /// Stop resolution, whether or not it has listeners
    ///
    /// Listeners stay registered, and adding another one restarts
    /// resolution. Disposing twice is harmless; dropping the resolver
    /// disposes it.
    pub fn dispose(&self) {
        self.query.dispose();
    }

    /// What this resolver subscribes to
    #[must_use]
    pub fn request(&self) -> &Request {
        self.query.request()
    }

    /// Answers as an asynchronous stream
    ///
    /// # Errors
    ///
    /// As for [`Resolver::add_found_listener`].
    #[cfg(feature = "async")]
    pub fn found_stream(&self) -> Result<ListenerStream<L::Item>> {
        self.query.found_stream()
    }

    /// Timeouts as an asynchronous stream
    ///
    /// # Errors
    ///
    /// As for [`Resolver::add_found_listener`].
    #[cfg(feature = "async")]
    pub fn timeout_stream(&self) -> Result<ListenerStream<()>> {
        self.query.lost_stream()
    }
}

impl Resolver<ResolveService> {
    /// Resolve a service instance, on any interface and protocol
    pub fn new(
        connection: impl Into<ConnectionRef>,
        name: &str,
        service_type: &str,
        domain: &str,
    ) -> Self {
        Self::with_scope(
            connection,
            Interface::Any,
            Protocol::Unspecified,
            name,
            service_type,
            domain,
            Protocol::Unspecified,
        )
    }

    /// Resolve a service found by a [`ServiceBrowser`](crate::ServiceBrowser)
    ///
    /// Resolves on the interface and protocol where it was found, and
    /// asks for an address of that same protocol.
    pub fn for_service(
        connection: impl Into<ConnectionRef>,
        service: &ServiceInfo,
    ) -> Self {
        Self::with_scope(
            connection,
            service.interface,
            service.protocol,
            &service.name,
            &service.service_type,
            &service.domain,
            service.protocol,
        )
    }

    /// Resolve a service instance, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        name: &str,
        service_type: &str,
        domain: &str,
        address_protocol: Protocol,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::ResolveService {
                interface,
                protocol,
                name: name.to_string(),
                service_type: service_type.to_string(),
                domain: domain.to_string(),
                address_protocol,
            },
        )
    }

    /// The resolved service, unless it has since timed out
    #[must_use]
    pub fn service(&self) -> Option<ServiceInfo> {
        self.result()
    }
}

impl Resolver<ResolveHostName> {
    /// Resolve a host name (e.g. "printer.local") to any address
    pub fn new(connection: impl Into<ConnectionRef>, host_name: &str) -> Self {
        Self::with_scope(
            connection,
            Interface::Any,
            Protocol::Unspecified,
            host_name,
            Protocol::Unspecified,
        )
    }

    /// Resolve a host name, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        host_name: &str,
        address_protocol: Protocol,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::ResolveHostName {
                interface,
                protocol,
                host_name: host_name.to_string(),
                address_protocol,
            },
        )
    }

    /// The resolved address, unless it has since timed out
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        self.result().map(|r| r.address)
    }

    /// The host name as reported by the resolution
    #[must_use]
    pub fn host_name(&self) -> Option<String> {
        self.result().map(|r| r.host_name)
    }
}

impl Resolver<ResolveAddress> {
    /// Resolve an address to a host name
    pub fn new(connection: impl Into<ConnectionRef>, address: IpAddr) -> Self {
        Self::with_scope(connection, Interface::Any, Protocol::Unspecified, address)
    }

    /// Resolve an address, with every parameter explicit
    pub fn with_scope(
        connection: impl Into<ConnectionRef>,
        interface: Interface,
        protocol: Protocol,
        address: IpAddr,
    ) -> Self {
        Self::with_request(
            connection.into(),
            Request::ResolveAddress {
                interface,
                protocol,
                address,
            },
        )
    }

    /// The resolved host name, unless it has since timed out
    #[must_use]
    pub fn host_name(&self) -> Option<String> {
        self.result().map(|r| r.host_name)
    }

    /// The address as reported by the resolution
    #[must_use]
    pub fn address(&self) -> Option<IpAddr> {
        self.result().map(|r| r.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_resolved_service() {
        let s = ResolveService::decode(
            Interface::Index(1),
            Protocol::Ipv4,
            Record::ResolvedService {
                name: "printer".to_string(),
                service_type: "_ipp._tcp".to_string(),
                domain: "local".to_string(),
                host_name: "printer.local".to_string(),
                address: Some(IpAddr::from([192, 0, 2, 5])),
                port: 631,
                text: vec![b"rp=ipp/print".to_vec()],
            },
        )
        .unwrap();
        assert_eq!(s.host_name.as_deref(), Some("printer.local"));
        assert_eq!(s.port, 631);
        assert_eq!(s.txt("rp"), Some(&b"ipp/print"[..]));
    }

    #[test]
    fn service_resolver_rejects_unresolved_service() {
        assert!(ResolveService::decode(
            Interface::Any,
            Protocol::Unspecified,
            Record::Service {
                name: "printer".to_string(),
                service_type: "_ipp._tcp".to_string(),
                domain: "local".to_string(),
            },
        )
        .is_none());
    }
}
