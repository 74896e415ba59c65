use thiserror::Error;

/// A failure status reported by a discovery session
///
/// The numeric values are stable and match the codes used on the wire
/// by common DNS-SD daemons, so that an error code received from a
/// daemon can be mapped directly with [`ErrorCode::from_code`].
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic failure
    Failure = -1,
    /// Object was in a bad state
    BadState = -2,
    /// Invalid host name
    InvalidHostName = -3,
    /// Invalid domain name
    InvalidDomainName = -4,
    /// No suitable network protocol available
    NoNetwork = -5,
    /// Invalid DNS TTL
    InvalidTtl = -6,
    /// Resource record key is pattern
    IsPattern = -7,
    /// Name collision
    Collision = -8,
    /// Invalid resource record
    InvalidRecord = -9,
    /// Invalid service name
    InvalidServiceName = -10,
    /// Invalid service type
    InvalidServiceType = -11,
    /// Invalid port number
    InvalidPort = -12,
    /// Invalid key
    InvalidKey = -13,
    /// Invalid address
    InvalidAddress = -14,
    /// Timeout reached
    Timeout = -15,
    /// Too many clients
    TooManyClients = -16,
    /// Too many objects
    TooManyObjects = -17,
    /// Too many entries
    TooManyEntries = -18,
    /// Operating system error
    Os = -19,
    /// Access denied
    AccessDenied = -20,
    /// Invalid operation
    InvalidOperation = -21,
    /// An unexpected IPC error occurred
    Ipc = -22,
    /// Daemon connection failed
    Disconnected = -23,
    /// Memory exhausted
    NoMemory = -24,
    /// The object passed to this function was invalid
    InvalidObject = -25,
    /// Daemon not running
    NoDaemon = -26,
    /// Invalid interface index
    InvalidInterface = -27,
    /// Invalid protocol specification
    InvalidProtocol = -28,
    /// Invalid flags
    InvalidFlags = -29,
    /// Not found
    NotFound = -30,
    /// Configuration error
    InvalidConfig = -31,
    /// Version mismatch
    VersionMismatch = -32,
    /// Invalid service subtype
    InvalidServiceSubtype = -33,
    /// Invalid packet
    InvalidPacket = -34,
    /// Invalid DNS return code
    InvalidDnsError = -35,
    /// DNS failure: FORMERR
    DnsFormErr = -36,
    /// DNS failure: SERVFAIL
    DnsServFail = -37,
    /// DNS failure: NXDOMAIN
    DnsNxDomain = -38,
    /// DNS failure: NOTIMP
    DnsNotImp = -39,
    /// DNS failure: REFUSED
    DnsRefused = -40,
    /// DNS failure: YXDOMAIN
    DnsYxDomain = -41,
    /// DNS failure: YXRRSET
    DnsYxRrSet = -42,
    /// DNS failure: NXRRSET
    DnsNxRrSet = -43,
    /// DNS failure: NOTAUTH
    DnsNotAuth = -44,
    /// DNS failure: NOTZONE
    DnsNotZone = -45,
    /// Invalid RDATA
    InvalidRdata = -46,
    /// Invalid DNS type
    InvalidDnsType = -47,
    /// Invalid DNS class
    InvalidDnsClass = -48,
    /// Not supported
    NotSupported = -49,
    /// Operation not permitted
    NotPermitted = -50,
    /// Invalid argument
    InvalidArgument = -51,
    /// Is empty
    IsEmpty = -52,
    /// The requested operation is invalid because it is redundant
    NoChange = -53,
}

const MESSAGES: [(ErrorCode, &str); 53] = [
    (ErrorCode::Failure, "Operation failed"),
    (ErrorCode::BadState, "Bad state"),
    (ErrorCode::InvalidHostName, "Invalid host name"),
    (ErrorCode::InvalidDomainName, "Invalid domain name"),
    (ErrorCode::NoNetwork, "No suitable network protocol available"),
    (ErrorCode::InvalidTtl, "Invalid DNS TTL"),
    (ErrorCode::IsPattern, "Resource record key is pattern"),
    (ErrorCode::Collision, "Local name collision"),
    (ErrorCode::InvalidRecord, "Invalid record"),
    (ErrorCode::InvalidServiceName, "Invalid service name"),
    (ErrorCode::InvalidServiceType, "Invalid service type"),
    (ErrorCode::InvalidPort, "Invalid port number"),
    (ErrorCode::InvalidKey, "Invalid record key"),
    (ErrorCode::InvalidAddress, "Invalid address"),
    (ErrorCode::Timeout, "Timeout reached"),
    (ErrorCode::TooManyClients, "Too many clients"),
    (ErrorCode::TooManyObjects, "Too many objects"),
    (ErrorCode::TooManyEntries, "Too many entries"),
    (ErrorCode::Os, "OS Error"),
    (ErrorCode::AccessDenied, "Access denied"),
    (ErrorCode::InvalidOperation, "Invalid operation"),
    (ErrorCode::Ipc, "An unexpected IPC error occurred"),
    (ErrorCode::Disconnected, "Daemon connection failed"),
    (ErrorCode::NoMemory, "Memory exhausted"),
    (ErrorCode::InvalidObject, "The object passed in was not valid"),
    (ErrorCode::NoDaemon, "Daemon not running"),
    (ErrorCode::InvalidInterface, "Invalid interface index"),
    (ErrorCode::InvalidProtocol, "Invalid protocol specification"),
    (ErrorCode::InvalidFlags, "Invalid flags"),
    (ErrorCode::NotFound, "Not found"),
    (ErrorCode::InvalidConfig, "Invalid configuration"),
    (ErrorCode::VersionMismatch, "Version mismatch"),
    (ErrorCode::InvalidServiceSubtype, "Invalid service subtype"),
    (ErrorCode::InvalidPacket, "Invalid packet"),
    (ErrorCode::InvalidDnsError, "Invalid DNS return code"),
    (ErrorCode::DnsFormErr, "DNS failure: FORMERR"),
    (ErrorCode::DnsServFail, "DNS failure: SERVFAIL"),
    (ErrorCode::DnsNxDomain, "DNS failure: NXDOMAIN"),
    (ErrorCode::DnsNotImp, "DNS failure: NOTIMP"),
    (ErrorCode::DnsRefused, "DNS failure: REFUSED"),
    (ErrorCode::DnsYxDomain, "DNS failure: YXDOMAIN"),
    (ErrorCode::DnsYxRrSet, "DNS failure: YXRRSET"),
    (ErrorCode::DnsNxRrSet, "DNS failure: NXRRSET"),
    (ErrorCode::DnsNotAuth, "DNS failure: NOTAUTH"),
    (ErrorCode::DnsNotZone, "DNS failure: NOTZONE"),
    (ErrorCode::InvalidRdata, "Invalid RDATA"),
    (ErrorCode::InvalidDnsType, "Invalid DNS type"),
    (ErrorCode::InvalidDnsClass, "Invalid DNS class"),
    (ErrorCode::NotSupported, "Not supported"),
    (ErrorCode::NotPermitted, "Not permitted"),
    (ErrorCode::InvalidArgument, "Invalid argument"),
    (ErrorCode::IsEmpty, "Is empty"),
    (
        ErrorCode::NoChange,
        "The requested operation is invalid because redundant",
    ),
];

impl ErrorCode {
    /// Map a raw status code onto an `ErrorCode`
    ///
    /// Returns `None` for zero (success) and for codes outside the
    /// known range.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        MESSAGES.iter().map(|(c, _)| *c).find(|c| c.code() == code)
    }

    /// The raw (negative) status code
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human-readable description of this error
    #[must_use]
    pub fn message(self) -> &'static str {
        describe(self.code())
    }
}

impl ::core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        f.write_str(self.message())
    }
}

impl ::std::error::Error for ErrorCode {}

/// Human-readable description of any raw status code
///
/// Zero reads "OK"; codes with no known meaning read "Invalid Error
/// Code".
#[must_use]
pub fn describe(code: i32) -> &'static str {
    if code == 0 {
        return "OK";
    }
    MESSAGES
        .iter()
        .find(|(c, _)| c.code() == code)
        .map_or("Invalid Error Code", |(_, message)| message)
}

/// The errors which can be returned by connections and queries
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The discovery session could not be established
    #[error("cannot open discovery session: {0}")]
    Open(ErrorCode),

    /// The discovery session refused a property read or a subscription
    #[error("discovery session error {}: {code}", .code.code())]
    Operation {
        /// Status reported by the session
        code: ErrorCode,
    },

    /// The connection has been closed, or has been dropped altogether
    #[error("connection closed")]
    Closed,

    /// A listener panicked while being notified
    #[error("listener panicked: {0}")]
    Listener(String),

    /// The event loop could not wait for, or be woken by, its session
    #[error("event loop I/O error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The session status behind this error, if there is one
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Open(code) | Self::Operation { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::Operation { code }
    }
}

/// Result type used throughout this crate
pub type Result<T> = ::std::result::Result<T, Error>;
