//! Publishing services of our own

use crate::alternative::alternative_service_name;
use crate::connection::{ConnectionRef, Subscriber, Subscription};
use crate::error::{Error, ErrorCode, Result};
use crate::event::{Interface, Protocol};
use crate::gateway::{Notification, SubscriptionKey};
use crate::listener::{fan_out, Handler, ListenerId, Listeners};
use crate::lock;
use bitflags::bitflags;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[cfg(feature = "async")]
use crate::stream::ListenerStream;
#[cfg(feature = "async")]
use tracing::warn;

bitflags! {
    /// How the records of a published service are announced
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PublishFlags: u32 {
        /// Nothing special
        const NONE = 0;
        /// The records are unique to this host
        const UNIQUE = 0x1;
        /// Skip probing for conflicts before announcing
        const NO_PROBE = 0x2;
        /// Do not announce the records once established
        const NO_ANNOUNCE = 0x4;
        /// Allow the same records on more than one host
        const ALLOW_MULTIPLE = 0x8;
        /// Do not add a reverse (address to name) record
        const NO_REVERSE = 0x10;
        /// Do not set the cache-flush bit
        const NO_COOKIE = 0x20;
        /// Update records already published
        const UPDATE = 0x40;
        /// Publish through wide-area DNS
        const USE_WIDE_AREA = 0x80;
        /// Publish through multicast DNS
        const USE_MULTICAST = 0x100;
    }
}

/// How far along the publication of an [`EntryGroup`] is
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryGroupState {
    /// Entries may be added; nothing is published yet
    #[default]
    Uncommitted,
    /// Committed; probing for conflicts
    Registering,
    /// Published
    Established,
    /// Another host already uses one of the names
    Collision,
    /// Publication failed for some other reason
    Failure,
}

/// One service to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Where to publish
    pub interface: Interface,
    /// Which address family to publish over
    pub protocol: Protocol,
    /// How to announce
    pub flags: PublishFlags,
    /// Instance name, e.g. "Kitchen printer"
    pub name: String,
    /// Service type, e.g. "_ipp._tcp"
    pub service_type: String,
    /// Domain; `None` means the session's default domain
    pub domain: Option<String>,
    /// Host offering the service; `None` means this host
    pub host: Option<String>,
    /// Port the service listens on
    pub port: u16,
    /// TXT strings
    pub text: Vec<Vec<u8>>,
}

impl ServiceEntry {
    /// A service on this host, in the default domain, on every
    /// interface
    #[must_use]
    pub fn new(name: &str, service_type: &str, port: u16) -> Self {
        Self {
            interface: Interface::Any,
            protocol: Protocol::Unspecified,
            flags: PublishFlags::NONE,
            name: name.to_string(),
            service_type: service_type.to_string(),
            domain: None,
            host: None,
            port,
            text: Vec::new(),
        }
    }

    /// Append a TXT string
    #[must_use]
    pub fn with_txt(mut self, text: impl AsRef<[u8]>) -> Self {
        self.text.push(text.as_ref().to_vec());
        self
    }

    /// The same entry under the next name to try after a collision
    ///
    /// ```
    /// # use dnssd_client::ServiceEntry;
    /// let entry = ServiceEntry::new("Printer", "_ipp._tcp", 631);
    /// assert_eq!(entry.alternative().name, "Printer #2");
    /// ```
    #[must_use]
    pub fn alternative(&self) -> Self {
        Self {
            name: alternative_service_name(&self.name),
            ..self.clone()
        }
    }
}

struct GroupState {
    registration: Option<Subscription>,
    listeners: Listeners<EntryGroupState>,
    entries: usize,
}

struct Group {
    connection: ConnectionRef,
    state: Mutex<GroupState>,
}

fn disposed() -> Error {
    Error::Operation {
        code: ErrorCode::BadState,
    }
}

impl Group {
    fn key(state: &GroupState) -> Result<SubscriptionKey> {
        state
            .registration
            .as_ref()
            .map(Subscription::key)
            .ok_or_else(disposed)
    }
}

impl Subscriber for Group {
    fn on_notification(&self, key: SubscriptionKey, _: Notification) {
        debug!(?key, "entry group ignoring notification");
    }

    fn on_group_state(&self, key: SubscriptionKey, state: EntryGroupState) {
        let guard = lock(&self.state);
        if Group::key(&guard).ok() != Some(key) {
            debug!(?key, ?state, "dropping state of an old group");
            return;
        }
        let handlers = guard.listeners.snapshot();
        drop(guard);
        debug!(?key, ?state, "entry group state changed");
        fan_out(&handlers, &state);
    }
}

/** A set of services published, and withdrawn, together
 *
 * Add one or more [`ServiceEntry`]s, then [`commit`](Self::commit).
 * The session then probes for conflicts and reports progress through
 * state listeners: `Registering`, then `Established` or `Collision`.
 * After a collision, [`reset`](Self::reset) the group and add the
 * entries again under [`alternative`](ServiceEntry::alternative)
 * names.
 *
 * Unlike browsers, a group exists in the session from construction
 * until [`dispose`](Self::dispose) (or drop), which withdraws anything
 * it published.
 */
pub struct EntryGroup {
    group: Arc<Group>,
}

impl EntryGroup {
    /// Create an empty group in the connection's session
    ///
    /// # Errors
    ///
    /// `Closed` if the connection is gone, or whatever the session
    /// reports, e.g. `NotSupported` if it cannot publish.
    pub fn new(connection: impl Into<ConnectionRef>) -> Result<Self> {
        let group = Arc::new(Group {
            connection: connection.into(),
            state: Mutex::new(GroupState {
                registration: None,
                listeners: Listeners::default(),
                entries: 0,
            }),
        });
        let weak = Arc::downgrade(&group);
        let registration = group.connection.create_group(weak)?;
        lock(&group.state).registration = Some(registration);
        Ok(Self { group })
    }

    /// Be told of every state change
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(EntryGroupState) + Send + Sync + 'static,
    {
        let handler: Handler<EntryGroupState> =
            Arc::new(move |state: &EntryGroupState| listener(*state));
        lock(&self.group.state).listeners.add(handler)
    }

    /// Returns false if there was no such listener
    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        lock(&self.group.state).listeners.remove(id)
    }

    /// State changes as a stream
    ///
    /// # Errors
    ///
    /// `BadState` once the group has been disposed.
    #[cfg(feature = "async")]
    pub fn state_stream(&self) -> Result<ListenerStream<EntryGroupState>> {
        let (tx, rx) = tokio::sync::mpsc::channel(crate::stream::CAPACITY);
        let handler: Handler<EntryGroupState> =
            Arc::new(move |state: &EntryGroupState| {
                if tx.try_send(*state).is_err() {
                    warn!("stream is full or closed; dropping event");
                }
            });
        let id = {
            let mut state = lock(&self.group.state);
            Group::key(&state)?;
            state.listeners.add(handler)
        };
        let group = Arc::downgrade(&self.group);
        Ok(ListenerStream::new(rx, move || {
            if let Some(group) = group.upgrade() {
                lock(&group.state).listeners.remove(id);
            }
        }))
    }

    /// The session's view of this group
    ///
    /// # Errors
    ///
    /// `BadState` once disposed, `Closed` once the connection is.
    pub fn state(&self) -> Result<EntryGroupState> {
        let key = Group::key(&lock(&self.group.state))?;
        self.group.connection.with_gateway(|g| g.group_state(key))
    }

    /// Whether no entries have been added since creation or the last
    /// reset
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.group.state).entries == 0
    }

    /// Add a service to be published on the next commit
    ///
    /// # Errors
    ///
    /// `BadState` if the group is committed or disposed; otherwise
    /// whatever the session says about the entry, e.g.
    /// `InvalidServiceName`.
    pub fn add_service(&self, entry: &ServiceEntry) -> Result<()> {
        let mut state = lock(&self.group.state);
        let key = Group::key(&state)?;
        self.group
            .connection
            .with_gateway_mut(|g| g.add_service(key, entry))?;
        state.entries += 1;
        debug!(?key, name = %entry.name, "entry added");
        Ok(())
    }

    /// Publish everything added so far
    ///
    /// # Errors
    ///
    /// `IsEmpty` if nothing was added, `BadState` if disposed.
    pub fn commit(&self) -> Result<()> {
        let state = lock(&self.group.state);
        let key = Group::key(&state)?;
        if state.entries == 0 {
            return Err(Error::Operation {
                code: ErrorCode::IsEmpty,
            });
        }
        self.group.connection.with_gateway_mut(|g| g.commit_group(key))
    }

    /// Withdraw and forget every entry, returning to `Uncommitted`
    ///
    /// # Errors
    ///
    /// `BadState` if disposed.
    pub fn reset(&self) -> Result<()> {
        let mut state = lock(&self.group.state);
        let key = Group::key(&state)?;
        self.group.connection.with_gateway_mut(|g| g.reset_group(key))?;
        state.entries = 0;
        Ok(())
    }

    /// Whether the group still exists in the session
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.group.state).registration.is_some()
    }

    /// Withdraw the group from the session; idempotent
    ///
    /// Listeners are kept but will not be called again.
    pub fn dispose(&self) {
        let registration = lock(&self.group.state).registration.take();
        // Unsubscribe outside our own lock
        drop(registration);
    }
}

impl Drop for EntryGroup {
    fn drop(&mut self) {
        self.dispose();
    }
}
