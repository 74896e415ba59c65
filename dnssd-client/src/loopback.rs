use crate::entry_group::{EntryGroupState, ServiceEntry};
use crate::error::{Error, ErrorCode};
use crate::event::ClientState;
use crate::gateway::{
    Delivery, Gateway, Notification, Poller, Request, SubscriptionKey, Wait,
};
use crate::lock;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const WAKE: mio::Token = mio::Token(0);

struct Session {
    pending: VecDeque<Delivery>,
    active: BTreeMap<SubscriptionKey, Request>,
    groups: BTreeMap<SubscriptionKey, PublishedGroup>,
    state: ClientState,
    host_name: String,
    domain_name: String,
    open_error: Option<ErrorCode>,
    refuse: Option<ErrorCode>,
    fail: Option<ErrorCode>,
    last_error: Option<ErrorCode>,
    subscribes: usize,
    unsubscribes: usize,
}

/// An entry group as a [`LoopbackGateway`] holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedGroup {
    /// The group's subscription
    pub key: SubscriptionKey,
    /// Where the group is in its lifecycle
    pub state: EntryGroupState,
    /// Entries added since creation or the last reset, with their
    /// domains filled in
    pub services: Vec<ServiceEntry>,
}

impl Session {
    fn group_mut(
        &mut self,
        key: SubscriptionKey,
    ) -> Result<&mut PublishedGroup, ErrorCode> {
        self.groups.get_mut(&key).ok_or(ErrorCode::BadState)
    }

    fn change_group(&mut self, key: SubscriptionKey, state: EntryGroupState) {
        if let Some(group) = self.groups.get_mut(&key) {
            group.state = state;
            self.pending
                .push_back(Delivery::GroupStateChanged(key, state));
        }
    }
}

struct Shared {
    session: Mutex<Session>,
    waker: mio::Waker,
}

impl Shared {
    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            warn!(%err, "cannot wake loopback poller");
        }
    }

    fn push(&self, delivery: Delivery) {
        lock(&self.session).pending.push_back(delivery);
        self.wake();
    }
}

struct LoopbackPoller {
    poll: Mutex<mio::Poll>,
    shared: Arc<Shared>,
    quit: AtomicBool,
}

impl Poller for LoopbackPoller {
    fn wait(&self) -> Result<Wait, Error> {
        let mut poll = lock(&self.poll);
        let mut events = mio::Events::with_capacity(4);
        loop {
            if self.quit.load(Ordering::SeqCst) {
                return Ok(Wait::Quit);
            }
            {
                let mut session = lock(&self.shared.session);
                if let Some(code) = session.fail.take() {
                    return Err(Error::Operation { code });
                }
                if !session.pending.is_empty() {
                    return Ok(Wait::Ready);
                }
            }
            match poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn wakeup(&self) {
        self.shared.wake();
    }

    fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.shared.wake();
    }
}

/** An in-process discovery session, driven by hand
 *
 * Nothing is discovered unless it is injected, through the paired
 * [`Injector`]. This makes `LoopbackGateway` useful for testing code
 * which uses browsers and resolvers, and for demonstrations; the
 * injector can also simulate failures, such as a refused subscription
 * or a broken event loop.
 *
 * The blocking wait is a real `mio` poll, woken by a `mio::Waker`
 * whenever work is injected.
 */
pub struct LoopbackGateway {
    shared: Arc<Shared>,
    poller: Arc<LoopbackPoller>,
}

impl LoopbackGateway {
    /// Create a gateway, and the injector which drives it
    ///
    /// # Errors
    ///
    /// Passes on any error from creating the `mio` poll or waker.
    pub fn new() -> io::Result<(Self, Injector)> {
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKE)?;
        let shared = Arc::new(Shared {
            session: Mutex::new(Session {
                pending: VecDeque::new(),
                active: BTreeMap::new(),
                groups: BTreeMap::new(),
                state: ClientState::Running,
                host_name: "loopback".to_string(),
                domain_name: "local".to_string(),
                open_error: None,
                refuse: None,
                fail: None,
                last_error: None,
                subscribes: 0,
                unsubscribes: 0,
            }),
            waker,
        });
        let poller = Arc::new(LoopbackPoller {
            poll: Mutex::new(poll),
            shared: shared.clone(),
            quit: AtomicBool::new(false),
        });
        let injector = Injector {
            shared: shared.clone(),
        };
        Ok((Self { shared, poller }, injector))
    }
}

impl Gateway for LoopbackGateway {
    fn open_error(&self) -> Option<ErrorCode> {
        lock(&self.shared.session).open_error
    }

    fn state(&self) -> ClientState {
        lock(&self.shared.session).state
    }

    fn host_name(&self) -> Result<String, ErrorCode> {
        Ok(lock(&self.shared.session).host_name.clone())
    }

    fn domain_name(&self) -> Result<String, ErrorCode> {
        Ok(lock(&self.shared.session).domain_name.clone())
    }

    fn host_name_fqdn(&self) -> Result<String, ErrorCode> {
        let session = lock(&self.shared.session);
        Ok(format!("{}.{}", session.host_name, session.domain_name))
    }

    fn version(&self) -> Result<String, ErrorCode> {
        Ok(concat!("dnssd-client loopback ", env!("CARGO_PKG_VERSION"))
            .to_string())
    }

    fn last_error(&self) -> Option<ErrorCode> {
        lock(&self.shared.session).last_error
    }

    fn subscribe(
        &mut self,
        key: SubscriptionKey,
        request: &Request,
    ) -> Result<(), ErrorCode> {
        let mut session = lock(&self.shared.session);
        session.subscribes += 1;
        if let Some(code) = session.refuse.take() {
            session.last_error = Some(code);
            return Err(code);
        }
        debug!(?key, kind = request.kind(), "loopback subscribe");
        session.active.insert(key, request.clone());
        Ok(())
    }

    fn unsubscribe(&mut self, key: SubscriptionKey) {
        let mut session = lock(&self.shared.session);
        session.unsubscribes += 1;
        if session.active.remove(&key).is_none()
            && session.groups.remove(&key).is_none()
        {
            warn!(?key, "loopback unsubscribe of unknown key");
        }
    }

    fn new_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        let mut session = lock(&self.shared.session);
        if let Some(code) = session.refuse.take() {
            session.last_error = Some(code);
            return Err(code);
        }
        debug!(?key, "loopback entry group");
        session.groups.insert(
            key,
            PublishedGroup {
                key,
                state: EntryGroupState::Uncommitted,
                services: Vec::new(),
            },
        );
        Ok(())
    }

    fn add_service(
        &mut self,
        key: SubscriptionKey,
        entry: &ServiceEntry,
    ) -> Result<(), ErrorCode> {
        let mut session = lock(&self.shared.session);
        if entry.name.is_empty() {
            return Err(ErrorCode::InvalidServiceName);
        }
        if entry.service_type.is_empty() {
            return Err(ErrorCode::InvalidServiceType);
        }
        let domain = session.domain_name.clone();
        let group = session.group_mut(key)?;
        if matches!(
            group.state,
            EntryGroupState::Registering | EntryGroupState::Established
        ) {
            return Err(ErrorCode::BadState);
        }
        let mut entry = entry.clone();
        entry.domain.get_or_insert(domain);
        group.services.push(entry);
        Ok(())
    }

    fn commit_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        {
            let mut session = lock(&self.shared.session);
            let group = session.group_mut(key)?;
            if group.state != EntryGroupState::Uncommitted {
                return Err(ErrorCode::BadState);
            }
            if group.services.is_empty() {
                return Err(ErrorCode::IsEmpty);
            }
            session.change_group(key, EntryGroupState::Registering);
        }
        self.shared.wake();
        Ok(())
    }

    fn reset_group(&mut self, key: SubscriptionKey) -> Result<(), ErrorCode> {
        {
            let mut session = lock(&self.shared.session);
            session.group_mut(key)?.services.clear();
            session.change_group(key, EntryGroupState::Uncommitted);
        }
        self.shared.wake();
        Ok(())
    }

    fn group_state(
        &self,
        key: SubscriptionKey,
    ) -> Result<EntryGroupState, ErrorCode> {
        lock(&self.shared.session)
            .groups
            .get(&key)
            .map(|g| g.state)
            .ok_or(ErrorCode::BadState)
    }

    fn poller(&self) -> Arc<dyn Poller> {
        self.poller.clone()
    }

    fn dispatch(&mut self) -> Vec<Delivery> {
        lock(&self.shared.session).pending.drain(..).collect()
    }
}

/// Drives a [`LoopbackGateway`] from outside
///
/// Cheap to clone, and usable from any thread.
#[derive(Clone)]
pub struct Injector {
    shared: Arc<Shared>,
}

impl Injector {
    /// Deliver `notification` to every active subscription whose
    /// request satisfies `filter`; returns how many there were
    pub fn notify<F>(&self, filter: F, notification: &Notification) -> usize
    where
        F: Fn(&Request) -> bool,
    {
        let count = {
            let mut session = lock(&self.shared.session);
            let keys = session
                .active
                .iter()
                .filter(|(_, request)| filter(request))
                .map(|(key, _)| *key)
                .collect::<Vec<_>>();
            for key in &keys {
                session
                    .pending
                    .push_back(Delivery::Notification(*key, notification.clone()));
            }
            keys.len()
        };
        if count > 0 {
            self.shared.wake();
        }
        count
    }

    /// Deliver `notification` to every active subscription
    pub fn broadcast(&self, notification: &Notification) -> usize {
        self.notify(|_| true, notification)
    }

    /// Deliver `notification` tagged with `key`, whether or not that
    /// subscription is still active
    pub fn deliver(&self, key: SubscriptionKey, notification: Notification) {
        self.shared.push(Delivery::Notification(key, notification));
    }

    /// Change the session state, notifying the connection
    pub fn set_state(&self, state: ClientState) {
        lock(&self.shared.session).state = state;
        self.shared.push(Delivery::StateChanged(state));
    }

    /// Change the reported host name
    pub fn set_host_name(&self, host_name: &str) {
        lock(&self.shared.session).host_name = host_name.to_string();
    }

    /// Change the reported default domain
    pub fn set_domain_name(&self, domain_name: &str) {
        lock(&self.shared.session).domain_name = domain_name.to_string();
    }

    /// Move an entry group to `state`, as the network would after
    /// probing; returns false if there is no such group
    pub fn set_group_state(
        &self,
        key: SubscriptionKey,
        state: EntryGroupState,
    ) -> bool {
        let found = {
            let mut session = lock(&self.shared.session);
            let found = session.groups.contains_key(&key);
            session.change_group(key, state);
            found
        };
        if found {
            self.shared.wake();
        }
        found
    }

    /// The entry groups in existence, in key order
    #[must_use]
    pub fn groups(&self) -> Vec<PublishedGroup> {
        lock(&self.shared.session).groups.values().cloned().collect()
    }

    /// Make opening a connection over this gateway fail
    pub fn set_open_error(&self, code: Option<ErrorCode>) {
        lock(&self.shared.session).open_error = code;
    }

    /// Make the next subscription attempt fail
    pub fn refuse_next_subscribe(&self, code: ErrorCode) {
        lock(&self.shared.session).refuse = Some(code);
    }

    /// Make the event loop's next wait fail
    pub fn fail_event_loop(&self, code: ErrorCode) {
        lock(&self.shared.session).fail = Some(code);
        self.shared.wake();
    }

    /// The active subscriptions, in key order
    #[must_use]
    pub fn active(&self) -> Vec<(SubscriptionKey, Request)> {
        lock(&self.shared.session)
            .active
            .iter()
            .map(|(k, r)| (*k, r.clone()))
            .collect()
    }

    /// How many subscription attempts there have been, including
    /// refused ones
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        lock(&self.shared.session).subscribes
    }

    /// How many unsubscriptions there have been
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        lock(&self.shared.session).unsubscribes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Interface, Protocol};
    use crate::gateway::{RawEvent, Record};
    use slotmap::SlotMap;

    fn request() -> Request {
        Request::ServiceTypes {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            domain: "local".to_string(),
        }
    }

    #[test]
    fn queued_work_makes_wait_ready() {
        let (mut g, inj) = LoopbackGateway::new().unwrap();
        let poller = g.poller();
        let mut keys = SlotMap::<SubscriptionKey, ()>::with_key();
        let key = keys.insert(());
        g.subscribe(key, &request()).unwrap();

        let n = Notification {
            interface: Interface::Any,
            protocol: Protocol::Ipv4,
            event: RawEvent::Found(Record::Domain {
                domain: "local".to_string(),
            }),
        };
        assert_eq!(inj.broadcast(&n), 1);
        assert_eq!(poller.wait().unwrap(), Wait::Ready);
        assert_eq!(g.dispatch(), vec![Delivery::Notification(key, n)]);
        assert!(g.dispatch().is_empty());
    }

    #[test]
    fn quit_makes_wait_return() {
        let (g, _inj) = LoopbackGateway::new().unwrap();
        let poller = g.poller();
        let p2 = poller.clone();
        let t = std::thread::spawn(move || p2.wait().unwrap());
        poller.quit();
        assert_eq!(t.join().unwrap(), Wait::Quit);
    }

    #[test]
    fn refused_subscribe_sets_last_error() {
        let (mut g, inj) = LoopbackGateway::new().unwrap();
        let mut keys = SlotMap::<SubscriptionKey, ()>::with_key();
        inj.refuse_next_subscribe(ErrorCode::TooManyObjects);
        assert_eq!(
            g.subscribe(keys.insert(()), &request()),
            Err(ErrorCode::TooManyObjects)
        );
        assert_eq!(g.last_error(), Some(ErrorCode::TooManyObjects));
        assert!(g.subscribe(keys.insert(()), &request()).is_ok());
        assert_eq!(inj.subscribe_count(), 2);
        assert_eq!(inj.active().len(), 1);
    }

    #[test]
    fn failure_makes_wait_fail() {
        let (g, inj) = LoopbackGateway::new().unwrap();
        inj.fail_event_loop(ErrorCode::Disconnected);
        let e = g.poller().wait().unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::Disconnected));
    }

    #[test]
    fn group_lifecycle() {
        let (mut g, inj) = LoopbackGateway::new().unwrap();
        let mut keys = SlotMap::<SubscriptionKey, ()>::with_key();
        let key = keys.insert(());
        g.new_group(key).unwrap();
        assert_eq!(g.commit_group(key), Err(ErrorCode::IsEmpty));
        assert_eq!(
            g.add_service(key, &ServiceEntry::new("", "_ipp._tcp", 631)),
            Err(ErrorCode::InvalidServiceName)
        );
        g.add_service(key, &ServiceEntry::new("Printer", "_ipp._tcp", 631))
            .unwrap();
        assert_eq!(inj.groups()[0].services[0].domain.as_deref(), Some("local"));

        g.commit_group(key).unwrap();
        assert_eq!(g.group_state(key), Ok(EntryGroupState::Registering));
        assert_eq!(g.commit_group(key), Err(ErrorCode::BadState));
        assert_eq!(
            g.add_service(key, &ServiceEntry::new("Scanner", "_scan._tcp", 1)),
            Err(ErrorCode::BadState)
        );
        assert!(inj.set_group_state(key, EntryGroupState::Established));
        assert_eq!(
            g.dispatch(),
            vec![
                Delivery::GroupStateChanged(key, EntryGroupState::Registering),
                Delivery::GroupStateChanged(key, EntryGroupState::Established),
            ]
        );

        g.reset_group(key).unwrap();
        assert!(inj.groups()[0].services.is_empty());
        assert_eq!(g.group_state(key), Ok(EntryGroupState::Uncommitted));

        g.unsubscribe(key);
        assert!(inj.groups().is_empty());
        assert_eq!(g.group_state(key), Err(ErrorCode::BadState));
        assert!(!inj.set_group_state(key, EntryGroupState::Failure));
    }

    #[test]
    fn unmatched_notify_is_not_queued() {
        let (mut g, inj) = LoopbackGateway::new().unwrap();
        let n = Notification {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            event: RawEvent::Timeout,
        };
        assert_eq!(inj.broadcast(&n), 0);
        assert!(g.dispatch().is_empty());
    }
}
