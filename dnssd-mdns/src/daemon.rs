use mdns_sd::{
    HostnameResolutionEvent, Receiver, ServiceDaemon, ServiceEvent, ServiceInfo,
};

#[cfg(test)]
use mockall::automock;

/// The parts of an mdns-sd daemon which the gateway drives
///
/// Implemented by `mdns_sd::ServiceDaemon`; tests substitute a mock.
#[cfg_attr(test, automock)]
pub(crate) trait Daemon: Send {
    fn browse(
        &self,
        type_domain: &str,
    ) -> mdns_sd::Result<Receiver<ServiceEvent>>;

    fn stop_browse(&self, type_domain: &str) -> mdns_sd::Result<()>;

    fn resolve_hostname(
        &self,
        host: &str,
        timeout_ms: Option<u64>,
    ) -> mdns_sd::Result<Receiver<HostnameResolutionEvent>>;

    fn stop_resolve_hostname(&self, host: &str) -> mdns_sd::Result<()>;

    fn register(&self, info: ServiceInfo) -> mdns_sd::Result<()>;

    /// Withdraw a registered service, by full name
    fn unregister(&self, full_name: &str) -> mdns_sd::Result<()>;

    fn shutdown(&self) -> mdns_sd::Result<()>;
}

impl Daemon for ServiceDaemon {
    fn browse(
        &self,
        type_domain: &str,
    ) -> mdns_sd::Result<Receiver<ServiceEvent>> {
        ServiceDaemon::browse(self, type_domain)
    }

    fn stop_browse(&self, type_domain: &str) -> mdns_sd::Result<()> {
        ServiceDaemon::stop_browse(self, type_domain)
    }

    fn resolve_hostname(
        &self,
        host: &str,
        timeout_ms: Option<u64>,
    ) -> mdns_sd::Result<Receiver<HostnameResolutionEvent>> {
        ServiceDaemon::resolve_hostname(self, host, timeout_ms)
    }

    fn stop_resolve_hostname(&self, host: &str) -> mdns_sd::Result<()> {
        ServiceDaemon::stop_resolve_hostname(self, host)
    }

    fn register(&self, info: ServiceInfo) -> mdns_sd::Result<()> {
        ServiceDaemon::register(self, info)
    }

    fn unregister(&self, full_name: &str) -> mdns_sd::Result<()> {
        // The status arrives later; nobody waits for it
        ServiceDaemon::unregister(self, full_name).map(drop)
    }

    fn shutdown(&self) -> mdns_sd::Result<()> {
        ServiceDaemon::shutdown(self).map(drop)
    }
}
