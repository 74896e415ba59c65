use crate::entry_group::EntryGroupState;
use crate::error::{Error, ErrorCode, Result};
use crate::event::ClientState;
use crate::gateway::{
    Delivery, Gateway, Notification, Poller, Request, SubscriptionKey, Wait,
};
use crate::listener::{fan_out, ListenerId, Listeners};
use crate::lock;
use serde::Deserialize;
use slotmap::SlotMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Settings for a [`Connection`]
///
/// Deserializable, so that it can be embedded in an application's own
/// configuration file; missing fields take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Name given to the event-loop thread
    pub thread_name: String,

    /// Domain used by browsers constructed without one; if unset, the
    /// session's own domain (see [`Connection::domain_name`]) is used
    pub default_domain: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            thread_name: "dnssd-poll".to_string(),
            default_domain: None,
        }
    }
}

/// Something which receives the notifications for a subscription
pub(crate) trait Subscriber: Send + Sync {
    fn on_notification(&self, key: SubscriptionKey, notification: Notification);

    fn on_group_state(&self, key: SubscriptionKey, state: EntryGroupState) {
        debug!(?key, ?state, "ignoring entry group state");
    }
}

struct Session {
    gateway: Option<Box<dyn Gateway>>,
    subscribers: SlotMap<SubscriptionKey, Weak<dyn Subscriber>>,
    failed: bool,
}

pub(crate) struct Inner {
    session: Mutex<Session>,
    poller: Arc<dyn Poller>,
    state_listeners: Mutex<Listeners<ClientState>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    config: ConnectionConfig,
}

enum Work {
    State(ClientState),
    Notify(Arc<dyn Subscriber>, SubscriptionKey, Notification),
    Group(Arc<dyn Subscriber>, SubscriptionKey, EntryGroupState),
}

impl Inner {
    fn run(&self) {
        loop {
            match self.poller.wait() {
                Ok(Wait::Ready) => self.dispatch(),
                Ok(Wait::Quit) => break,
                Err(err) => {
                    error!(%err, "discovery event loop failed");
                    lock(&self.session).failed = true;
                    self.notify_state(ClientState::Disconnected);
                    break;
                }
            }
        }
        debug!("event loop exited");
    }

    fn dispatch(&self) {
        let work = {
            let mut session = lock(&self.session);
            let deliveries = match session.gateway.as_mut() {
                Some(gateway) => gateway.dispatch(),
                None => return,
            };
            let subscriber = |key: SubscriptionKey| {
                let subscriber =
                    session.subscribers.get(key).and_then(Weak::upgrade);
                if subscriber.is_none() {
                    debug!(?key, "dropping stale notification");
                }
                subscriber
            };
            deliveries
                .into_iter()
                .filter_map(|delivery| match delivery {
                    Delivery::StateChanged(state) => Some(Work::State(state)),
                    Delivery::Notification(key, n) => {
                        subscriber(key).map(|s| Work::Notify(s, key, n))
                    }
                    Delivery::GroupStateChanged(key, state) => {
                        subscriber(key).map(|s| Work::Group(s, key, state))
                    }
                })
                .collect::<Vec<_>>()
        };

        // Listeners run unlocked, so that they may start and stop queries
        for item in work {
            match item {
                Work::State(state) => self.notify_state(state),
                Work::Notify(subscriber, key, n) => {
                    subscriber.on_notification(key, n);
                }
                Work::Group(subscriber, key, state) => {
                    subscriber.on_group_state(key, state);
                }
            }
        }
    }

    fn notify_state(&self, state: ClientState) {
        debug!(?state, "session state changed");
        let handlers = lock(&self.state_listeners).snapshot();
        fan_out(&handlers, &state);
    }

    fn with_gateway<T>(
        &self,
        f: impl FnOnce(&dyn Gateway) -> ::std::result::Result<T, ErrorCode>,
    ) -> Result<T> {
        let session = lock(&self.session);
        let gateway = session.gateway.as_deref().ok_or(Error::Closed)?;
        f(gateway).map_err(Error::from)
    }

    fn with_gateway_mut<T>(
        &self,
        f: impl FnOnce(&mut dyn Gateway) -> ::std::result::Result<T, ErrorCode>,
    ) -> Result<T> {
        let mut session = lock(&self.session);
        let gateway = session.gateway.as_deref_mut().ok_or(Error::Closed)?;
        f(gateway).map_err(Error::from)
    }

    /// Allocate an arena key for `subscriber` and hand it to the
    /// gateway through `register`; a refusal frees the key again
    fn register(
        self: &Arc<Self>,
        kind: &'static str,
        subscriber: Weak<dyn Subscriber>,
        register: impl FnOnce(
            &mut dyn Gateway,
            SubscriptionKey,
        ) -> ::std::result::Result<(), ErrorCode>,
    ) -> Result<Subscription> {
        let mut guard = lock(&self.session);
        let session = &mut *guard;
        let gateway = session.gateway.as_deref_mut().ok_or(Error::Closed)?;
        if session.failed {
            // Nothing would ever be dispatched
            warn!(kind, "subscription refused: event loop has failed");
            return Err(Error::Operation {
                code: ErrorCode::BadState,
            });
        }
        let key = session.subscribers.insert(subscriber);
        if let Err(code) = register(gateway, key) {
            session.subscribers.remove(key);
            warn!(kind, %code, "subscription refused");
            return Err(Error::Operation { code });
        }
        drop(guard);
        debug!(?key, kind, "subscribed");
        self.poller.wakeup();
        Ok(Subscription {
            connection: Arc::downgrade(self),
            key,
        })
    }

    fn unsubscribe(&self, key: SubscriptionKey) {
        let mut guard = lock(&self.session);
        let session = &mut *guard;
        session.subscribers.remove(key);
        match session.gateway.as_mut() {
            Some(gateway) => gateway.unsubscribe(key),
            None => {
                warn!(?key, "subscription released after its connection closed");
                return;
            }
        }
        drop(guard);
        debug!(?key, "unsubscribed");
        self.poller.wakeup();
    }

    fn close(&self) {
        let Some(handle) = lock(&self.event_loop).take() else {
            return;
        };
        info!("closing connection");
        self.poller.quit();
        if handle.thread().id() == thread::current().id() {
            debug!("closed from the event loop; not waiting for it");
        } else if handle.join().is_err() {
            error!("event loop thread panicked");
        }
        let gateway = lock(&self.session).gateway.take();
        drop(gateway);
    }
}

/** A connection to a discovery session
 *
 * Owns the session (through a [`Gateway`]) and a background thread
 * which waits for, and dispatches, the session's notifications. Query
 * objects such as [`ServiceBrowser`](crate::ServiceBrowser) hang off
 * a connection, and their listeners are called on that thread.
 *
 * Listeners may freely add and remove listeners, dispose queries, and
 * even close the connection, from within a callback.
 *
 * Dropping a `Connection` closes it.
 */
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Open a connection over `gateway`, with default settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Open`] if the gateway reports that its session
    /// could not be established, or [`Error::Io`] if the event-loop
    /// thread cannot be started.
    pub fn open<G: Gateway + 'static>(gateway: G) -> Result<Self> {
        Self::with_config(gateway, ConnectionConfig::default())
    }

    /// Open a connection over `gateway`
    ///
    /// # Errors
    ///
    /// As for [`Connection::open`].
    pub fn with_config<G: Gateway + 'static>(
        gateway: G,
        config: ConnectionConfig,
    ) -> Result<Self> {
        if let Some(code) = gateway.open_error() {
            error!(%code, "cannot open discovery session");
            return Err(Error::Open(code));
        }
        let poller = gateway.poller();
        let inner = Arc::new(Inner {
            session: Mutex::new(Session {
                gateway: Some(Box::new(gateway)),
                subscribers: SlotMap::with_key(),
                failed: false,
            }),
            poller,
            state_listeners: Mutex::new(Listeners::default()),
            event_loop: Mutex::new(None),
            config,
        });

        let worker = inner.clone();
        let handle = thread::Builder::new()
            .name(inner.config.thread_name.clone())
            .spawn(move || worker.run())?;
        *lock(&inner.event_loop) = Some(handle);
        info!(thread = %inner.config.thread_name, "connection open");
        Ok(Self { inner })
    }

    /// Current session state
    ///
    /// Reads [`ClientState::Disconnected`] once the event loop has
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`Connection::close`].
    pub fn state(&self) -> Result<ClientState> {
        let session = lock(&self.inner.session);
        let gateway = session.gateway.as_deref().ok_or(Error::Closed)?;
        if session.failed {
            return Ok(ClientState::Disconnected);
        }
        Ok(gateway.state())
    }

    /// This host's name
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] if the session cannot say, or
    /// [`Error::Closed`] after [`Connection::close`].
    pub fn host_name(&self) -> Result<String> {
        self.inner.with_gateway(|g| g.host_name())
    }

    /// The session's default domain
    ///
    /// # Errors
    ///
    /// As for [`Connection::host_name`].
    pub fn domain_name(&self) -> Result<String> {
        self.inner.with_gateway(|g| g.domain_name())
    }

    /// This host's fully-qualified name
    ///
    /// # Errors
    ///
    /// As for [`Connection::host_name`].
    pub fn host_name_fqdn(&self) -> Result<String> {
        self.inner.with_gateway(|g| g.host_name_fqdn())
    }

    /// Version string of whatever performs discovery
    ///
    /// # Errors
    ///
    /// As for [`Connection::host_name`].
    pub fn version(&self) -> Result<String> {
        self.inner.with_gateway(|g| g.version())
    }

    /// The most recent failure reported by the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`Connection::close`].
    pub fn last_error(&self) -> Result<Option<ErrorCode>> {
        self.inner.with_gateway(|g| Ok(g.last_error()))
    }

    /// Register a callback for changes of session state
    ///
    /// Called on the event-loop thread.
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ClientState) + Send + Sync + 'static,
    {
        lock(&self.inner.state_listeners)
            .add(Arc::new(move |state: &ClientState| listener(*state)))
    }

    /// Deregister a callback added with [`Connection::add_state_listener`]
    ///
    /// Returns whether it was found.
    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        lock(&self.inner.state_listeners).remove(id)
    }

    /// Whether [`Connection::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.session).gateway.is_none()
    }

    /// Stop the event loop and release the session
    ///
    /// Blocks until the event-loop thread has exited, unless called
    /// from that thread (i.e., from a listener). Any queries still
    /// active are silently orphaned: they receive no further
    /// notifications. Closing twice is harmless.
    pub fn close(&self) {
        self.inner.close();
    }

    /// A non-owning handle, for constructing queries
    #[must_use]
    pub fn downgrade(&self) -> ConnectionRef {
        ConnectionRef {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// A non-owning handle to a [`Connection`]
///
/// Queries hold one of these, so a query never keeps its connection
/// open. Cheap to clone, and usable from any thread.
#[derive(Clone)]
pub struct ConnectionRef {
    inner: Weak<Inner>,
}

impl ConnectionRef {
    fn upgrade(&self) -> Result<Arc<Inner>> {
        self.inner.upgrade().ok_or(Error::Closed)
    }

    /// Whether the connection has been closed or dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |inner| lock(&inner.session).gateway.is_none())
    }

    pub(crate) fn default_domain(&self) -> Result<String> {
        let inner = self.upgrade()?;
        if let Some(domain) = &inner.config.default_domain {
            return Ok(domain.clone());
        }
        inner.with_gateway(|g| g.domain_name())
    }

    pub(crate) fn subscribe(
        &self,
        request: &Request,
        subscriber: Weak<dyn Subscriber>,
    ) -> Result<Subscription> {
        self.upgrade()?
            .register(request.kind(), subscriber, |gateway, key| {
                gateway.subscribe(key, request)
            })
    }

    pub(crate) fn create_group(
        &self,
        subscriber: Weak<dyn Subscriber>,
    ) -> Result<Subscription> {
        self.upgrade()?
            .register("entry-group", subscriber, |gateway, key| {
                gateway.new_group(key)
            })
    }

    pub(crate) fn with_gateway<T>(
        &self,
        f: impl FnOnce(&dyn Gateway) -> ::std::result::Result<T, ErrorCode>,
    ) -> Result<T> {
        self.upgrade()?.with_gateway(f)
    }

    pub(crate) fn with_gateway_mut<T>(
        &self,
        f: impl FnOnce(&mut dyn Gateway) -> ::std::result::Result<T, ErrorCode>,
    ) -> Result<T> {
        self.upgrade()?.with_gateway_mut(f)
    }
}

impl From<&Connection> for ConnectionRef {
    fn from(connection: &Connection) -> Self {
        connection.downgrade()
    }
}

impl From<&ConnectionRef> for ConnectionRef {
    fn from(connection: &ConnectionRef) -> Self {
        connection.clone()
    }
}

/// An active subscription; dropping it unsubscribes
pub(crate) struct Subscription {
    connection: Weak<Inner>,
    key: SubscriptionKey,
}

impl Subscription {
    pub(crate) fn key(&self) -> SubscriptionKey {
        self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.connection.upgrade() {
            Some(inner) => inner.unsubscribe(self.key),
            None => {
                warn!(key = ?self.key, "subscription outlived its connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockGateway, MockPoller};
    use std::time::{Duration, Instant};

    fn poller(fail: Option<ErrorCode>) -> Arc<dyn Poller> {
        let mut p = MockPoller::new();
        p.expect_wait().returning(move || match fail {
            Some(code) => Err(Error::Operation { code }),
            None => Ok(Wait::Quit),
        });
        p.expect_wakeup().return_const(());
        p.expect_quit().return_const(());
        Arc::new(p)
    }

    fn gateway(fail: Option<ErrorCode>) -> MockGateway {
        let mut g = MockGateway::new();
        g.expect_open_error().returning(|| None);
        let p = poller(fail);
        g.expect_poller().returning(move || p.clone());
        g
    }

    #[test]
    fn open_error_is_reported() {
        let mut g = MockGateway::new();
        g.expect_open_error()
            .returning(|| Some(ErrorCode::NoDaemon));
        let e = Connection::open(g).err();
        assert!(matches!(e, Some(Error::Open(ErrorCode::NoDaemon))));
    }

    #[test]
    fn properties_come_from_gateway() {
        let mut g = gateway(None);
        g.expect_host_name().returning(|| Ok("myhost".to_string()));
        g.expect_domain_name().returning(|| Ok("local".to_string()));
        g.expect_host_name_fqdn()
            .returning(|| Ok("myhost.local".to_string()));
        g.expect_version().returning(|| Ok("test 1.0".to_string()));
        g.expect_state().returning(|| ClientState::Running);
        g.expect_last_error().returning(|| None);
        let c = Connection::open(g).unwrap();
        assert_eq!(c.host_name().unwrap(), "myhost");
        assert_eq!(c.domain_name().unwrap(), "local");
        assert_eq!(c.host_name_fqdn().unwrap(), "myhost.local");
        assert_eq!(c.version().unwrap(), "test 1.0");
        assert_eq!(c.state().unwrap(), ClientState::Running);
        assert_eq!(c.last_error().unwrap(), None);
    }

    #[test]
    fn property_failure_carries_code() {
        let mut g = gateway(None);
        g.expect_host_name()
            .returning(|| Err(ErrorCode::Disconnected));
        let c = Connection::open(g).unwrap();
        let e = c.host_name().unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::Disconnected));
    }

    #[test]
    fn closed_connection_refuses_properties() {
        let c = Connection::open(gateway(None)).unwrap();
        assert!(!c.is_closed());
        c.close();
        c.close();
        assert!(c.is_closed());
        assert!(matches!(c.host_name(), Err(Error::Closed)));
        assert!(matches!(c.state(), Err(Error::Closed)));
    }

    #[test]
    fn config_overrides_default_domain() {
        let g = gateway(None);
        let config = ConnectionConfig {
            default_domain: Some("example.org".to_string()),
            ..ConnectionConfig::default()
        };
        let c = Connection::with_config(g, config).unwrap();
        assert_eq!(c.downgrade().default_domain().unwrap(), "example.org");
    }

    #[test]
    fn loop_failure_disconnects() {
        let mut g = gateway(Some(ErrorCode::Disconnected));
        g.expect_state().returning(|| ClientState::Running);
        let c = Connection::open(g).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while c.state().unwrap() != ClientState::Disconnected {
            assert!(Instant::now() < deadline, "loop never failed");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dropped_connection_leaves_dead_refs() {
        let c = Connection::open(gateway(None)).unwrap();
        let r = ConnectionRef::from(&c);
        let r2 = ConnectionRef::from(&r);
        assert!(!r.is_closed());
        drop(c);
        assert!(r.is_closed());
        assert!(matches!(r2.default_domain(), Err(Error::Closed)));
    }

    #[test]
    fn config_defaults() {
        let c: ConnectionConfig = toml::from_str("").unwrap();
        assert_eq!(c, ConnectionConfig::default());
        assert_eq!(c.thread_name, "dnssd-poll");

        let c: ConnectionConfig =
            toml::from_str("default_domain = \"example.org\"").unwrap();
        assert_eq!(c.thread_name, "dnssd-poll");
        assert_eq!(c.default_domain.as_deref(), Some("example.org"));
    }
}
