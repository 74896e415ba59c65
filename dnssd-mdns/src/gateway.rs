use crate::daemon::Daemon;
use crate::names;
use crate::poller::{Channel, Incoming, MdnsPoller, Source, SourceId};
use dnssd_client::{
    ClientState, Delivery, EntryGroupState, ErrorCode, Gateway, Interface,
    Notification, Poller, Protocol, RawEvent, Record, Request, ServiceEntry,
    SubscriptionKey,
};
use mdns_sd::{HostnameResolutionEvent, ServiceDaemon, ServiceEvent};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Errors in setting up an [`MdnsGateway`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The mdns-sd daemon could not be started
    #[error("cannot start mDNS daemon: {0}")]
    Daemon(#[from] mdns_sd::Error),

    /// No host name was configured, and the system's could not be read
    #[error("cannot read host name: {0}")]
    HostName(#[source] std::io::Error),
}

/// Settings for an [`MdnsGateway`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MdnsConfig {
    /// How long a resolver waits for an answer before reporting a
    /// timeout, in milliseconds; `None` waits indefinitely
    pub resolve_timeout_ms: Option<u64>,

    /// Host name to report, instead of the system's
    pub host_name: Option<String>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: Some(5000),
            host_name: None,
        }
    }
}

/// One open channel to the daemon, shared by every subscription
/// which needs it
struct Shared {
    id: SourceId,
    subscribers: BTreeSet<SubscriptionKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Target {
    Browse(String),
    Host(String),
}

enum Interest {
    ServiceTypes {
        seen: HashSet<String>,
    },
    Services {
        type_domain: String,
        service_type: String,
        domain: String,
        seen: HashSet<String>,
    },
    ResolveService {
        full_name: String,
        name: String,
        service_type: String,
        domain: String,
        address_protocol: Protocol,
        deadline: Option<Instant>,
    },
    ResolveHostName {
        host_name: String,
        address_protocol: Protocol,
        current: Option<IpAddr>,
        /// The daemon has given up searching
        finished: bool,
    },
}

struct Subscription {
    target: Target,
    interest: Interest,
}

/// An entry group: services registered with the daemon together
#[derive(Default)]
struct Group {
    state: EntryGroupState,
    entries: Vec<mdns_sd::ServiceInfo>,
    /// Full names currently registered
    registered: Vec<String>,
}

/** A discovery session which speaks multicast DNS itself
 *
 * Backed by an `mdns_sd::ServiceDaemon`, which owns the sockets and
 * the wire format. Supports browsing for service types (through the
 * DNS-SD meta query) and for services, and resolving services and
 * host names, all in the "local" domain. Browsing for domains, and
 * resolving addresses back to host names, are refused with
 * [`ErrorCode::NotSupported`].
 *
 * mdns-sd allows only one browse per service type, so subscriptions
 * for the same type share one; a newly-joined subscription restarts
 * the browse so that the daemon replays what it already knows, and
 * each subscription filters out repeats.
 *
 * Entry groups are published through the daemon's `register`. mdns-sd
 * announces without probing, so a committed group goes straight from
 * `Registering` to `Established` and never reports `Collision`.
 */
pub struct MdnsGateway {
    daemon: Box<dyn Daemon>,
    poller: Arc<MdnsPoller>,
    config: MdnsConfig,
    host_name: String,
    next_id: SourceId,
    channels: HashMap<Target, Shared>,
    subscriptions: HashMap<SubscriptionKey, Subscription>,
    groups: HashMap<SubscriptionKey, Group>,
    last_error: Option<ErrorCode>,
}

impl MdnsGateway {
    /// Start an mdns-sd daemon, with default settings
    ///
    /// # Errors
    ///
    /// Returns `Err` if the daemon cannot be started, or if the system
    /// host name cannot be read.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(MdnsConfig::default())
    }

    /// Start an mdns-sd daemon
    ///
    /// # Errors
    ///
    /// Returns `Err` if the daemon cannot be started, or if no host
    /// name is configured and the system's cannot be read.
    pub fn with_config(config: MdnsConfig) -> Result<Self, Error> {
        let host_name = match &config.host_name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map_err(Error::HostName)?
                .to_string_lossy()
                .into_owned(),
        };
        let daemon = ServiceDaemon::new()?;
        info!(host = %host_name, "mdns daemon started");
        Ok(Self::with_daemon(Box::new(daemon), config, host_name))
    }

    pub(crate) fn with_daemon(
        daemon: Box<dyn Daemon>,
        config: MdnsConfig,
        host_name: String,
    ) -> Self {
        Self {
            daemon,
            poller: Arc::new(MdnsPoller::new()),
            config,
            host_name,
            next_id: 0,
            channels: HashMap::new(),
            subscriptions: HashMap::new(),
            groups: HashMap::new(),
            last_error: None,
        }
    }

    fn fail(&mut self, code: ErrorCode) -> ErrorCode {
        self.last_error = Some(code);
        code
    }

    fn deadline(&self) -> Option<Instant> {
        self.config
            .resolve_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms))
    }

    fn interest(&self, request: &Request) -> Result<Subscription, ErrorCode> {
        match request {
            Request::Domains { .. } | Request::ResolveAddress { .. } => {
                Err(ErrorCode::NotSupported)
            }
            Request::ServiceTypes { domain, .. } => {
                names::check_domain(domain)?;
                Ok(Subscription {
                    target: Target::Browse(names::META_QUERY.to_string()),
                    interest: Interest::ServiceTypes {
                        seen: HashSet::new(),
                    },
                })
            }
            Request::Services {
                service_type,
                domain,
                ..
            } => {
                let type_domain = names::type_domain(service_type, domain)?;
                Ok(Subscription {
                    target: Target::Browse(type_domain.clone()),
                    interest: Interest::Services {
                        type_domain,
                        service_type: service_type.clone(),
                        domain: domain.clone(),
                        seen: HashSet::new(),
                    },
                })
            }
            Request::ResolveService {
                name,
                service_type,
                domain,
                address_protocol,
                ..
            } => {
                if name.is_empty() {
                    return Err(ErrorCode::InvalidServiceName);
                }
                let type_domain = names::type_domain(service_type, domain)?;
                Ok(Subscription {
                    interest: Interest::ResolveService {
                        full_name: names::full_name(name, &type_domain),
                        name: name.clone(),
                        service_type: service_type.clone(),
                        domain: domain.clone(),
                        address_protocol: *address_protocol,
                        deadline: self.deadline(),
                    },
                    target: Target::Browse(type_domain),
                })
            }
            Request::ResolveHostName {
                host_name,
                address_protocol,
                ..
            } => Ok(Subscription {
                target: Target::Host(names::host_fqdn(host_name)?),
                interest: Interest::ResolveHostName {
                    host_name: host_name.clone(),
                    address_protocol: *address_protocol,
                    current: None,
                    finished: false,
                },
            }),
        }
    }

    /// (Re)start the daemon's query for `target`, replacing any
    /// previous channel for it
    fn open_channel(&mut self, target: &Target) -> Result<SourceId, ErrorCode> {
        let channel = match target {
            Target::Browse(type_domain) => {
                Channel::Browse(self.daemon.browse(type_domain).map_err(
                    |err| {
                        warn!(%err, %type_domain, "mdns browse failed");
                        ErrorCode::Failure
                    },
                )?)
            }
            Target::Host(host) => Channel::Host(
                self.daemon
                    .resolve_hostname(host, self.config.resolve_timeout_ms)
                    .map_err(|err| {
                        warn!(%err, %host, "mdns resolve failed");
                        ErrorCode::Failure
                    })?,
            ),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.poller.add_source(Source { id, channel });
        Ok(id)
    }

    fn close_channel(&self, target: &Target) {
        let result = match target {
            Target::Browse(type_domain) => self.daemon.stop_browse(type_domain),
            Target::Host(host) => self.daemon.stop_resolve_hostname(host),
        };
        if let Err(err) = result {
            debug!(%err, ?target, "mdns stop failed");
        }
    }

    fn update_deadline(&self) {
        let next = self
            .subscriptions
            .values()
            .filter_map(|s| match s.interest {
                Interest::ResolveService { deadline, .. } => deadline,
                _ => None,
            })
            .min();
        self.poller.set_deadline(next);
    }

    fn target_of(&self, id: SourceId) -> Option<Target> {
        self.channels
            .iter()
            .find(|(_, shared)| shared.id == id)
            .map(|(target, _)| target.clone())
    }

    fn subscribers_of(&self, target: &Target) -> Vec<SubscriptionKey> {
        self.channels
            .get(target)
            .map(|s| s.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    fn on_service_event(
        &mut self,
        target: &Target,
        event: &ServiceEvent,
        out: &mut Vec<Delivery>,
    ) {
        for key in self.subscribers_of(target) {
            let Some(subscription) = self.subscriptions.get_mut(&key) else {
                continue;
            };
            if let Some(notification) =
                service_notification(&mut subscription.interest, event)
            {
                out.push(Delivery::Notification(key, notification));
            }
        }
    }

    fn on_host_event(
        &mut self,
        target: &Target,
        event: &HostnameResolutionEvent,
        out: &mut Vec<Delivery>,
    ) {
        for key in self.subscribers_of(target) {
            let Some(subscription) = self.subscriptions.get_mut(&key) else {
                continue;
            };
            if let Some(notification) =
                host_notification(&mut subscription.interest, event)
            {
                out.push(Delivery::Notification(key, notification));
            }
        }
    }

    fn on_closed(&mut self, target: &Target, out: &mut Vec<Delivery>) {
        let closed = self.channels.remove(target);
        for key in closed.into_iter().flat_map(|s| s.subscribers) {
            if let Some(Subscription {
                interest:
                    Interest::ResolveHostName {
                        current, finished, ..
                    },
                ..
            }) = self.subscriptions.get_mut(&key)
            {
                // An answer found before the channel closed still stands
                let unanswered = !*finished && current.is_none();
                *finished = true;
                if unanswered {
                    out.push(Delivery::Notification(key, timeout()));
                }
            } else {
                warn!(?key, ?target, "mdns daemon stopped a browse");
            }
        }
    }

    fn expire(&mut self, out: &mut Vec<Delivery>) {
        let now = Instant::now();
        for (key, subscription) in &mut self.subscriptions {
            if let Interest::ResolveService { deadline, .. } =
                &mut subscription.interest
            {
                if deadline.is_some_and(|d| d <= now) {
                    *deadline = None;
                    out.push(Delivery::Notification(*key, timeout()));
                }
            }
        }
    }
}

impl MdnsGateway {
    fn group_mut(
        &mut self,
        key: SubscriptionKey,
    ) -> Result<&mut Group, ErrorCode> {
        self.groups.get_mut(&key).ok_or(ErrorCode::BadState)
    }

    fn service_info(
        &self,
        entry: &ServiceEntry,
    ) -> Result<mdns_sd::ServiceInfo, ErrorCode> {
        if entry.name.is_empty() {
            return Err(ErrorCode::InvalidServiceName);
        }
        let domain = entry.domain.as_deref().unwrap_or(names::LOCAL);
        let type_domain = names::type_domain(&entry.service_type, domain)?;
        let host = match entry.host.as_deref() {
            Some(host) => names::host_fqdn(host)?,
            None => names::host_fqdn(
                self.host_name.split('.').next().unwrap_or_default(),
            )?,
        };
        let properties = entry
            .text
            .iter()
            .map(|text| txt_property(text))
            .collect::<Vec<_>>();
        mdns_sd::ServiceInfo::new(
            &type_domain,
            &entry.name,
            &host,
            (),
            entry.port,
            &properties[..],
        )
        .map(mdns_sd::ServiceInfo::enable_addr_auto)
        .map_err(|err| {
            warn!(%err, name = %entry.name, "mdns refused service entry");
            ErrorCode::InvalidRecord
        })
    }

    /// Withdraw whatever `group` has registered
    fn withdraw(&self, group: &mut Group) {
        for full_name in group.registered.drain(..) {
            if let Err(err) = self.daemon.unregister(&full_name) {
                warn!(%err, %full_name, "mdns unregister failed");
            }
        }
    }

    fn change_group_state(
        &self,
        key: SubscriptionKey,
        group: &mut Group,
        state: EntryGroupState,
    ) {
        group.state = state;
        self.poller.post(Delivery::GroupStateChanged(key, state));
    }
}

/// A TXT string as mdns-sd's key and value
fn txt_property(text: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(text);
    match text.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (text.into_owned(), String::new()),
    }
}

fn timeout() -> Notification {
    Notification {
        interface: Interface::Any,
        protocol: Protocol::Unspecified,
        event: RawEvent::Timeout,
    }
}

fn any(event: RawEvent) -> Notification {
    Notification {
        interface: Interface::Any,
        protocol: Protocol::Unspecified,
        event,
    }
}

/// The address to report, out of several, for a given protocol
fn pick<'a>(
    addresses: impl IntoIterator<Item = &'a IpAddr>,
    protocol: Protocol,
) -> Option<IpAddr> {
    addresses
        .into_iter()
        .filter(|a| protocol.admits(a))
        .min()
        .copied()
}

fn txt(info: &mdns_sd::ServiceInfo) -> Vec<Vec<u8>> {
    info.get_properties()
        .iter()
        .map(|property| {
            let mut entry = property.key().as_bytes().to_vec();
            if let Some(value) = property.val() {
                entry.push(b'=');
                entry.extend_from_slice(value);
            }
            entry
        })
        .collect()
}

/// What, if anything, one subscription should hear about a browse event
fn service_notification(
    interest: &mut Interest,
    event: &ServiceEvent,
) -> Option<Notification> {
    match (interest, event) {
        (
            Interest::ServiceTypes { seen },
            ServiceEvent::ServiceFound(_, answer),
        ) => {
            let (service_type, domain) = names::service_type_of(answer)?;
            seen.insert(answer.to_ascii_lowercase()).then(|| {
                any(RawEvent::Found(Record::ServiceType {
                    service_type: service_type.to_string(),
                    domain: domain.to_string(),
                }))
            })
        }
        (
            Interest::ServiceTypes { seen },
            ServiceEvent::ServiceRemoved(_, answer),
        ) => {
            let (service_type, domain) = names::service_type_of(answer)?;
            seen.remove(&answer.to_ascii_lowercase()).then(|| {
                any(RawEvent::Removed(Record::ServiceType {
                    service_type: service_type.to_string(),
                    domain: domain.to_string(),
                }))
            })
        }
        (
            Interest::Services {
                type_domain,
                service_type,
                domain,
                seen,
            },
            event,
        ) => {
            let (full_name, found) = match event {
                ServiceEvent::ServiceFound(_, full_name) => {
                    (full_name.as_str(), true)
                }
                ServiceEvent::ServiceResolved(info) => {
                    (info.get_fullname(), true)
                }
                ServiceEvent::ServiceRemoved(_, full_name) => {
                    (full_name.as_str(), false)
                }
                _ => return None,
            };
            let name = names::instance_name(full_name, type_domain)?;
            let record = Record::Service {
                name: name.to_string(),
                service_type: service_type.clone(),
                domain: domain.clone(),
            };
            let key = full_name.to_ascii_lowercase();
            if found {
                seen.insert(key).then(|| any(RawEvent::Found(record)))
            } else {
                seen.remove(&key).then(|| any(RawEvent::Removed(record)))
            }
        }
        (
            Interest::ResolveService {
                full_name,
                name,
                service_type,
                domain,
                address_protocol,
                deadline,
            },
            ServiceEvent::ServiceResolved(info),
        ) if info.get_fullname().eq_ignore_ascii_case(full_name) => {
            *deadline = None;
            let address = pick(info.get_addresses(), *address_protocol);
            Some(Notification {
                interface: Interface::Any,
                protocol: address
                    .as_ref()
                    .map_or(Protocol::Unspecified, Protocol::of),
                event: RawEvent::Found(Record::ResolvedService {
                    name: name.clone(),
                    service_type: service_type.clone(),
                    domain: domain.clone(),
                    host_name: names::display_name(info.get_hostname()),
                    address,
                    port: info.get_port(),
                    text: txt(info),
                }),
            })
        }
        (
            Interest::ResolveService { full_name, .. },
            ServiceEvent::ServiceRemoved(_, removed),
        ) if removed.eq_ignore_ascii_case(full_name) => Some(timeout()),
        _ => None,
    }
}

/// What, if anything, one subscription should hear about a host event
fn host_notification(
    interest: &mut Interest,
    event: &HostnameResolutionEvent,
) -> Option<Notification> {
    let Interest::ResolveHostName {
        host_name,
        address_protocol,
        current,
        finished,
    } = interest
    else {
        return None;
    };
    match event {
        HostnameResolutionEvent::AddressesFound(_, addresses) => {
            let address = pick(addresses, *address_protocol)?;
            if *current == Some(address) {
                return None;
            }
            *current = Some(address);
            Some(Notification {
                interface: Interface::Any,
                protocol: Protocol::of(&address),
                event: RawEvent::Found(Record::HostAddress {
                    host_name: host_name.clone(),
                    address,
                }),
            })
        }
        HostnameResolutionEvent::AddressesRemoved(_, addresses) => {
            let gone = current.is_some_and(|a| addresses.contains(&a));
            gone.then(|| {
                *current = None;
                timeout()
            })
        }
        HostnameResolutionEvent::SearchTimeout(_) => {
            // The search has ended; only an unanswered one has timed out
            let first = !std::mem::replace(finished, true);
            (first && current.is_none()).then(timeout)
        }
        _ => None,
    }
}

impl Gateway for MdnsGateway {
    fn state(&self) -> ClientState {
        ClientState::Running
    }

    fn host_name(&self) -> Result<String, ErrorCode> {
        Ok(self.host_name.clone())
    }

    fn domain_name(&self) -> Result<String, ErrorCode> {
        Ok(names::LOCAL.to_string())
    }

    fn host_name_fqdn(&self) -> Result<String, ErrorCode> {
        Ok(format!("{}.{}", self.host_name, names::LOCAL))
    }

    fn version(&self) -> Result<String, ErrorCode> {
        Ok(concat!("dnssd-mdns ", env!("CARGO_PKG_VERSION")).to_string())
    }

    fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    fn subscribe(
        &mut self,
        key: SubscriptionKey,
        request: &Request,
    ) -> Result<(), ErrorCode> {
        let subscription = match self.interest(request) {
            Ok(s) => s,
            Err(code) => return Err(self.fail(code)),
        };
        let target = subscription.target.clone();

        // A restarted browse replays the daemon's cache, which is how
        // a newly-joined subscription learns what is already known
        let restart = matches!(target, Target::Browse(_))
            || !self.channels.contains_key(&target);
        if restart {
            let id = match self.open_channel(&target) {
                Ok(id) => id,
                Err(code) => return Err(self.fail(code)),
            };
            let shared = self.channels.entry(target.clone()).or_insert(Shared {
                id,
                subscribers: BTreeSet::new(),
            });
            if shared.id != id {
                self.poller.remove_source(shared.id);
                shared.id = id;
            }
        }
        if let Some(shared) = self.channels.get_mut(&target) {
            shared.subscribers.insert(key);
        }
        debug!(?key, kind = request.kind(), ?target, "mdns subscribe");
        self.subscriptions.insert(key, subscription);
        self.update_deadline();
        Ok(())
    }

    fn unsubscribe(&mut self, key: SubscriptionKey) {
        if let Some(mut group) = self.groups.remove(&key) {
            self.withdraw(&mut group);
            debug!(?key, "mdns entry group freed");
            return;
        }
        let Some(subscription) = self.subscriptions.remove(&key) else {
            warn!(?key, "mdns unsubscribe of unknown key");
            return;
        };
        let target = subscription.target;
        let last = match self.channels.get_mut(&target) {
            Some(shared) => {
                shared.subscribers.remove(&key);
                shared.subscribers.is_empty()
            }
            None => false,
        };
        if last {
            if let Some(shared) = self.channels.remove(&target) {
                self.poller.remove_source(shared.id);
            }
            self.close_channel(&target);
        }
        debug!(?key, ?target, last, "mdns unsubscribe");
        self.update_deadline();
    }

    fn new_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        debug!(?key, "mdns entry group");
        self.groups.insert(key, Group::default());
        Ok(())
    }

    fn add_service(
        &mut self,
        key: SubscriptionKey,
        entry: &ServiceEntry,
    ) -> Result<(), ErrorCode> {
        let info = match self.service_info(entry) {
            Ok(info) => info,
            Err(code) => return Err(self.fail(code)),
        };
        let group = self.group_mut(key)?;
        if matches!(
            group.state,
            EntryGroupState::Registering | EntryGroupState::Established
        ) {
            return Err(ErrorCode::BadState);
        }
        group.entries.push(info);
        Ok(())
    }

    fn commit_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let group = self.group_mut(key)?;
        if group.state != EntryGroupState::Uncommitted {
            return Err(ErrorCode::BadState);
        }
        if group.entries.is_empty() {
            return Err(ErrorCode::IsEmpty);
        }
        let mut group = std::mem::take(group);
        self.change_group_state(key, &mut group, EntryGroupState::Registering);
        let mut result = Ok(());
        for info in &group.entries {
            let full_name = info.get_fullname().to_string();
            match self.daemon.register(info.clone()) {
                Ok(()) => {
                    info!(%full_name, "mdns service registered");
                    group.registered.push(full_name);
                }
                Err(err) => {
                    warn!(%err, %full_name, "mdns register failed");
                    result = Err(ErrorCode::Failure);
                    break;
                }
            }
        }
        let state = match result {
            Ok(()) => EntryGroupState::Established,
            Err(code) => {
                self.withdraw(&mut group);
                self.last_error = Some(code);
                EntryGroupState::Failure
            }
        };
        self.change_group_state(key, &mut group, state);
        self.groups.insert(key, group);
        Ok(())
    }

    fn reset_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let mut group = std::mem::take(self.group_mut(key)?);
        self.withdraw(&mut group);
        group.entries.clear();
        self.change_group_state(key, &mut group, EntryGroupState::Uncommitted);
        self.groups.insert(key, group);
        Ok(())
    }

    fn group_state(
        &self,
        key: SubscriptionKey,
    ) -> Result<EntryGroupState, ErrorCode> {
        self.groups
            .get(&key)
            .map(|g| g.state)
            .ok_or(ErrorCode::BadState)
    }

    fn poller(&self) -> Arc<dyn Poller> {
        self.poller.clone()
    }

    fn dispatch(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        for incoming in self.poller.take_ready() {
            let id = match &incoming {
                Incoming::Service(id, _)
                | Incoming::Host(id, _)
                | Incoming::Closed(id) => *id,
                Incoming::Local(delivery) => {
                    out.push(delivery.clone());
                    continue;
                }
            };
            let Some(target) = self.target_of(id) else {
                debug!(id, "dropping event from superseded mdns channel");
                continue;
            };
            match incoming {
                Incoming::Service(_, event) => {
                    self.on_service_event(&target, &event, &mut out);
                }
                Incoming::Host(_, event) => {
                    self.on_host_event(&target, &event, &mut out);
                }
                Incoming::Closed(_) => self.on_closed(&target, &mut out),
                Incoming::Local(_) => {}
            }
        }
        self.expire(&mut out);
        self.update_deadline();
        out
    }
}

impl Drop for MdnsGateway {
    fn drop(&mut self) {
        if let Err(err) = self.daemon.shutdown() {
            warn!(%err, "mdns daemon shutdown failed");
        }
    }
}
