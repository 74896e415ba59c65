//! Conversions between dnssd-client's names and mdns-sd's

use dnssd_client::ErrorCode;

/// Type-domain whose PTR records enumerate the service types present
pub(crate) const META_QUERY: &str = "_services._dns-sd._udp.local.";

/// The only domain multicast DNS serves
pub(crate) const LOCAL: &str = "local";

fn trim_dot(s: &str) -> &str {
    s.strip_suffix('.').unwrap_or(s)
}

/// Accept `domain` only if it is the multicast DNS domain
pub(crate) fn check_domain(domain: &str) -> Result<(), ErrorCode> {
    if trim_dot(domain).eq_ignore_ascii_case(LOCAL) {
        Ok(())
    } else {
        Err(ErrorCode::NotSupported)
    }
}

/// mdns-sd's "type-domain" for a service type, e.g. "_http._tcp" in
/// "local" is "_http._tcp.local."
pub(crate) fn type_domain(
    service_type: &str,
    domain: &str,
) -> Result<String, ErrorCode> {
    check_domain(domain)?;
    let service_type = trim_dot(service_type);
    let Some((application, transport)) = service_type.rsplit_once('.')
    else {
        return Err(ErrorCode::InvalidServiceType);
    };
    if !application.starts_with('_')
        || application.len() < 2
        || !(transport == "_tcp" || transport == "_udp")
    {
        return Err(ErrorCode::InvalidServiceType);
    }
    Ok(format!("{service_type}.{LOCAL}."))
}

/// The full name of one instance, e.g. "Kitchen printer._ipp._tcp.local."
pub(crate) fn full_name(name: &str, type_domain: &str) -> String {
    format!("{name}.{type_domain}")
}

/// The instance part of a full name, if it is of the given type-domain
pub(crate) fn instance_name<'a>(
    full_name: &'a str,
    type_domain: &str,
) -> Option<&'a str> {
    let prefix_len = full_name.len().checked_sub(type_domain.len() + 1)?;
    if !full_name.is_char_boundary(prefix_len) {
        return None;
    }
    let (prefix, suffix) = full_name.split_at(prefix_len);
    let suffix = suffix.strip_prefix('.')?;
    if suffix.eq_ignore_ascii_case(type_domain) && !prefix.is_empty() {
        Some(prefix)
    } else {
        None
    }
}

/// Split a meta-query answer, e.g. "_http._tcp.local.", into service
/// type and domain
pub(crate) fn service_type_of(answer: &str) -> Option<(&str, &str)> {
    let (service_type, domain) = trim_dot(answer).rsplit_once('.')?;
    if service_type.is_empty() || domain.is_empty() {
        None
    } else {
        Some((service_type, domain))
    }
}

/// The name mdns-sd wants for a host, e.g. "printer.local."
pub(crate) fn host_fqdn(host_name: &str) -> Result<String, ErrorCode> {
    let host_name = trim_dot(host_name);
    if host_name.is_empty() {
        return Err(ErrorCode::InvalidHostName);
    }
    match host_name.rsplit_once('.') {
        None => Ok(format!("{host_name}.{LOCAL}.")),
        Some((_, domain)) => {
            check_domain(domain)?;
            Ok(format!("{host_name}."))
        }
    }
}

/// Strip the root dot from a name as mdns-sd reports it
pub(crate) fn display_name(name: &str) -> String {
    trim_dot(name).to_string()
}
