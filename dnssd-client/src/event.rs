use std::net::IpAddr;

/// Which network interface(s) a query or result refers to
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Interface {
    /// All interfaces (when querying), or unknown (in results)
    #[default]
    Any,

    /// One specific interface, by OS interface index
    Index(u32),
}

impl Interface {
    /// Convert from the signed convention where any negative value
    /// means "all interfaces"
    #[must_use]
    pub fn from_raw(index: i32) -> Self {
        u32::try_from(index).map_or(Self::Any, Self::Index)
    }

    /// Convert to the signed convention where -1 means "all interfaces"
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Any => -1,
            Self::Index(ix) => i32::try_from(ix).unwrap_or(-1),
        }
    }
}

/// Which IP protocol a query or result refers to
///
/// Queries carry two of these: the protocol over which to ask, and
/// (for resolvers) the protocol of the address wanted in the answer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Either protocol
    #[default]
    Unspecified,

    /// IPv4 only
    Ipv4,

    /// IPv6 only
    Ipv6,
}

impl Protocol {
    /// Convert from the address-family numbering (0, 2, 10)
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            2 => Some(Self::Ipv4),
            10 => Some(Self::Ipv6),
            _ => None,
        }
    }

    /// Convert to the address-family numbering (0, 2, 10)
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Unspecified => 0,
            Self::Ipv4 => 2,
            Self::Ipv6 => 10,
        }
    }

    /// The protocol of a particular address
    #[must_use]
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Whether an address is acceptable under this protocol selection
    #[must_use]
    pub fn admits(self, address: &IpAddr) -> bool {
        self == Self::Unspecified || self == Self::of(address)
    }
}

/// State of the session behind a [`Connection`](crate::Connection)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Not yet (or no longer) valid
    Invalid,
    /// The session is registering its host records
    Registering,
    /// The session is up and serving queries
    Running,
    /// The session's host name collided with another host's
    Collision,
    /// The session has lost contact with the discovery daemon, or its
    /// event loop has failed
    Disconnected,
}

/// Which kind of domain a [`DomainBrowser`](crate::DomainBrowser)
/// looks for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum DomainBrowserType {
    /// Domains recommended for registering services
    Register,
    /// The default domain for registering services
    RegisterDefault,
    /// Domains recommended for browsing
    #[default]
    Browse,
    /// The default domain for browsing
    BrowseDefault,
    /// Legacy browse domains
    BrowseLegacy,
}

/// A browse domain, as reported by a
/// [`DomainBrowser`](crate::DomainBrowser)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainInfo {
    /// Interface on which the domain was seen
    pub interface: Interface,
    /// Protocol over which the domain was seen
    pub protocol: Protocol,
    /// Domain name, e.g. "local"
    pub domain: String,
}

/// A service type, as reported by a
/// [`ServiceTypeBrowser`](crate::ServiceTypeBrowser)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceTypeInfo {
    /// Interface on which the type was seen
    pub interface: Interface,
    /// Protocol over which the type was seen
    pub protocol: Protocol,
    /// Service type, e.g. "_http._tcp"
    pub service_type: String,
    /// Domain of the service type, e.g. "local"
    pub domain: String,
}

/// A service instance
///
/// Reported both by [`ServiceBrowser`](crate::ServiceBrowser), which
/// fills in only the identifying fields (interface, protocol, name,
/// type, domain), and by [`ServiceResolver`](crate::ServiceResolver),
/// which also fills in where to reach the service.
///
/// Two `ServiceInfo`s describe the same discovery if all their fields
/// are equal; browsers rely on this when a service is removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInfo {
    /// Interface on which the service was seen
    pub interface: Interface,
    /// Protocol over which the service was seen
    pub protocol: Protocol,
    /// Instance name, e.g. "Kitchen printer"
    pub name: String,
    /// Service type, e.g. "_ipp._tcp"
    pub service_type: String,
    /// Domain, e.g. "local"
    pub domain: String,
    /// Target host name; only present once resolved
    pub host_name: Option<String>,
    /// Target address; only present once resolved
    pub address: Option<IpAddr>,
    /// Target port; zero until resolved
    pub port: u16,
    /// TXT record strings, each typically of the form `key=value`
    pub text: Vec<Vec<u8>>,
}

impl ServiceInfo {
    /// An unresolved service, as found by browsing
    #[must_use]
    pub fn new(
        interface: Interface,
        protocol: Protocol,
        name: &str,
        service_type: &str,
        domain: &str,
    ) -> Self {
        Self {
            interface,
            protocol,
            name: name.to_string(),
            service_type: service_type.to_string(),
            domain: domain.to_string(),
            host_name: None,
            address: None,
            port: 0,
            text: Vec::new(),
        }
    }

    /// Look up a TXT record value by key
    ///
    /// Returns `Some(b"")` for a key that is present with an empty
    /// value or with no value at all. Keys compare case-insensitively.
    #[must_use]
    pub fn txt(&self, key: &str) -> Option<&[u8]> {
        self.text.iter().find_map(|entry| {
            let (k, v) = match entry.iter().position(|b| *b == b'=') {
                Some(eq) => (&entry[..eq], &entry[eq + 1..]),
                None => (&entry[..], &entry[entry.len()..]),
            };
            k.eq_ignore_ascii_case(key.as_bytes()).then_some(v)
        })
    }
}

/// A host name together with one of its addresses
///
/// Reported by [`HostNameResolver`](crate::HostNameResolver) and
/// [`AddressResolver`](crate::AddressResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    /// Interface on which the mapping was seen
    pub interface: Interface,
    /// Protocol over which the mapping was seen
    pub protocol: Protocol,
    /// Host name, e.g. "printer.local"
    pub host_name: String,
    /// Address of that host
    pub address: IpAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn can_debug() {
        let e = format!("{:?}", Interface::Index(3));
        assert_eq!(e, "Index(3)".to_string());
    }

    #[test]
    #[allow(clippy::redundant_clone)]
    fn can_clone() {
        let s = ServiceInfo::new(
            Interface::Any,
            Protocol::Ipv4,
            "printer",
            "_ipp._tcp",
            "local",
        );
        assert_eq!(s.clone(), s);
    }

    #[test]
    fn interface_raw_conversions() {
        assert_eq!(Interface::from_raw(-1), Interface::Any);
        assert_eq!(Interface::from_raw(-7), Interface::Any);
        assert_eq!(Interface::from_raw(4), Interface::Index(4));
        assert_eq!(Interface::Any.to_raw(), -1);
        assert_eq!(Interface::Index(4).to_raw(), 4);
    }

    #[test]
    fn protocol_codes() {
        assert_eq!(Protocol::Unspecified.code(), 0);
        assert_eq!(Protocol::Ipv4.code(), 2);
        assert_eq!(Protocol::Ipv6.code(), 10);
        assert_eq!(Protocol::from_code(10), Some(Protocol::Ipv6));
        assert_eq!(Protocol::from_code(3), None);
    }

    #[test]
    fn protocol_admits() {
        let v4 = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 5));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert!(Protocol::Unspecified.admits(&v4));
        assert!(Protocol::Unspecified.admits(&v6));
        assert!(Protocol::Ipv4.admits(&v4));
        assert!(!Protocol::Ipv4.admits(&v6));
        assert!(!Protocol::Ipv6.admits(&v4));
        assert_eq!(Protocol::of(&v6), Protocol::Ipv6);
    }

    #[test]
    fn txt_lookup() {
        let mut s = ServiceInfo::new(
            Interface::Any,
            Protocol::Unspecified,
            "printer",
            "_ipp._tcp",
            "local",
        );
        s.text = vec![
            b"rp=ipp/print".to_vec(),
            b"Color".to_vec(),
            b"note=".to_vec(),
        ];
        assert_eq!(s.txt("rp"), Some(&b"ipp/print"[..]));
        assert_eq!(s.txt("RP"), Some(&b"ipp/print"[..]));
        assert_eq!(s.txt("color"), Some(&b""[..]));
        assert_eq!(s.txt("note"), Some(&b""[..]));
        assert_eq!(s.txt("missing"), None);
    }
}
