//! Choosing a new name after a naming conflict
//!
//! When a host or service name turns out to be taken already, the
//! usual remedy is to try a slightly different one. These functions
//! generate the conventional sequences: `myhost`, `myhost2`,
//! `myhost3`, ... for hosts, and `My Printer`, `My Printer #2`,
//! `My Printer #3`, ... for service instances.

/// The next host name to try after `name` collided
///
/// A trailing run of digits is incremented; otherwise "2" is appended.
///
/// ```
/// # use dnssd_client::alternative_host_name;
/// assert_eq!(alternative_host_name("gurke"), "gurke2");
/// assert_eq!(alternative_host_name("gurke9"), "gurke10");
/// ```
#[must_use]
pub fn alternative_host_name(name: &str) -> String {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.is_empty() || stem.len() == name.len() {
        return format!("{name}2");
    }
    match name[stem.len()..].parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
        Some(n) => format!("{stem}{n}"),
        None => format!("{name}2"),
    }
}

/// The next service instance name to try after `name` collided
///
/// A trailing " #n" is incremented; otherwise " #2" is appended.
///
/// ```
/// # use dnssd_client::alternative_service_name;
/// assert_eq!(alternative_service_name("gurke"), "gurke #2");
/// assert_eq!(alternative_service_name("gurke #2"), "gurke #3");
/// ```
#[must_use]
pub fn alternative_service_name(name: &str) -> String {
    if let Some(ix) = name.rfind(" #") {
        let (prefix, suffix) = name.split_at(ix + 2);
        if suffix.bytes().all(|b| b.is_ascii_digit()) {
            let n = if suffix.is_empty() {
                Some(0)
            } else {
                suffix.parse::<u64>().ok()
            };
            if let Some(n) = n.and_then(|n| n.checked_add(1)) {
                return format!("{prefix}{n}");
            }
        }
    }
    format!("{name} #2")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_sequence() {
        let mut name = "gurke".to_string();
        let mut seen = Vec::new();
        for _ in 0..3 {
            name = alternative_host_name(&name);
            seen.push(name.clone());
        }
        assert_eq!(seen, vec!["gurke2", "gurke3", "gurke4"]);
    }

    #[test]
    fn host_name_edge_cases() {
        assert_eq!(alternative_host_name("gurke9"), "gurke10");
        assert_eq!(alternative_host_name("web-01"), "web-2");
        assert_eq!(alternative_host_name("123"), "1232");
        assert_eq!(alternative_host_name(""), "2");
        assert_eq!(
            alternative_host_name("x99999999999999999999999"),
            "x999999999999999999999992"
        );
    }

    #[test]
    fn service_name_sequence() {
        assert_eq!(alternative_service_name("gurke"), "gurke #2");
        assert_eq!(alternative_service_name("gurke #2"), "gurke #3");
        assert_eq!(alternative_service_name("gurke #9"), "gurke #10");
    }

    #[test]
    fn service_name_edge_cases() {
        assert_eq!(alternative_service_name("foo #x"), "foo #x #2");
        assert_eq!(alternative_service_name("foo #"), "foo #1");
        assert_eq!(alternative_service_name("a #2 #7"), "a #2 #8");
        assert_eq!(alternative_service_name("#3"), "#3 #2");
        assert_eq!(alternative_service_name(""), " #2");
    }
}
