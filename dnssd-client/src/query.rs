use crate::connection::{ConnectionRef, Subscriber, Subscription};
use crate::error::Result;
use crate::event::{Interface, Protocol};
use crate::gateway::{Notification, RawEvent, Record, Request, SubscriptionKey};
use crate::listener::{fan_out, Handler, ListenerId, Listeners};
use crate::lock;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

#[cfg(feature = "async")]
use crate::stream::ListenerStream;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// What a [`Browser`](crate::Browser) or [`Resolver`](crate::Resolver)
/// looks for
///
/// Implemented only by the marker types in this crate, such as
/// [`BrowseServices`](crate::BrowseServices).
pub trait Lookup: sealed::Sealed + 'static {
    /// The type of each result
    type Item: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    #[doc(hidden)]
    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<Self::Item>;
}

/// How a query folds notifications into its results
pub(crate) trait Model: 'static {
    type Item: Clone + Send + Sync + 'static;
    type Lost: Send + Sync + 'static;
    type Results: Default + Send + 'static;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<Self::Item>;

    fn found(results: &mut Self::Results, item: &Self::Item);

    /// Fold a removal (with its item) or a timeout (without); returns
    /// what to tell the lost-listeners, if anything
    fn lost(
        results: &mut Self::Results,
        item: Option<Self::Item>,
    ) -> Option<Self::Lost>;
}

/// Browsers accumulate a set, in order of discovery
pub(crate) struct Browse<L>(PhantomData<L>);

impl<L: Lookup> Model for Browse<L> {
    type Item = L::Item;
    type Lost = L::Item;
    type Results = Vec<L::Item>;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<L::Item> {
        L::decode(interface, protocol, record)
    }

    fn found(results: &mut Vec<L::Item>, item: &L::Item) {
        results.push(item.clone());
    }

    fn lost(
        results: &mut Vec<L::Item>,
        item: Option<L::Item>,
    ) -> Option<L::Item> {
        let item = item?;
        // Removing something never seen still tells the listeners
        if let Some(ix) = results.iter().position(|x| *x == item) {
            results.remove(ix);
        }
        Some(item)
    }
}

/// Resolvers keep only the latest answer
pub(crate) struct Resolve<L>(PhantomData<L>);

impl<L: Lookup> Model for Resolve<L> {
    type Item = L::Item;
    type Lost = ();
    type Results = Option<L::Item>;

    fn decode(
        interface: Interface,
        protocol: Protocol,
        record: Record,
    ) -> Option<L::Item> {
        L::decode(interface, protocol, record)
    }

    fn found(results: &mut Option<L::Item>, item: &L::Item) {
        *results = Some(item.clone());
    }

    fn lost(results: &mut Option<L::Item>, _: Option<L::Item>) -> Option<()> {
        *results = None;
        Some(())
    }
}

struct State<M: Model> {
    found: Listeners<M::Item>,
    lost: Listeners<M::Lost>,
    results: M::Results,
    subscription: Option<Subscription>,
}

type ListSelector<M, T> = fn(&mut State<M>) -> &mut Listeners<T>;

impl<M: Model> State<M> {
    fn found_list(&mut self) -> &mut Listeners<M::Item> {
        &mut self.found
    }

    fn lost_list(&mut self) -> &mut Listeners<M::Lost> {
        &mut self.lost
    }

    fn has_listeners(&self) -> bool {
        !self.found.is_empty() || !self.lost.is_empty()
    }
}

pub(crate) struct Shared<M: Model> {
    connection: ConnectionRef,
    request: Request,
    state: Mutex<State<M>>,
}

impl<M: Model> Shared<M> {
    fn add_listener<T>(
        self: &Arc<Self>,
        handler: Handler<T>,
        list: ListSelector<M, T>,
    ) -> Result<ListenerId> {
        let mut state = lock(&self.state);
        let id = list(&mut state).add(handler);
        if let Err(err) = self.start(&mut state) {
            list(&mut state).remove(id);
            return Err(err);
        }
        Ok(id)
    }

    fn remove_listener<T>(&self, id: ListenerId, list: ListSelector<M, T>) -> bool {
        let mut state = lock(&self.state);
        let removed = list(&mut state).remove(id);
        if removed {
            Self::stop(&mut state, false);
        }
        removed
    }

    /// Subscribe, unless already subscribed or nobody is listening
    fn start(self: &Arc<Self>, state: &mut State<M>) -> Result<()> {
        if state.subscription.is_some() || !state.has_listeners() {
            return Ok(());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = self.connection.subscribe(&self.request, weak)?;
        debug!(
            kind = self.request.kind(),
            key = ?subscription.key(),
            "query started"
        );
        state.results = M::Results::default();
        state.subscription = Some(subscription);
        Ok(())
    }

    /// Unsubscribe, if forced or if nobody is listening
    fn stop(state: &mut State<M>, force: bool) {
        if force || !state.has_listeners() {
            if let Some(subscription) = state.subscription.take() {
                debug!(key = ?subscription.key(), "query stopped");
            }
        }
    }

    fn lose(&self, mut state: MutexGuard<'_, State<M>>, item: Option<M::Item>) {
        match M::lost(&mut state.results, item) {
            Some(lost) => {
                let handlers = state.lost.snapshot();
                drop(state);
                fan_out(&handlers, &lost);
            }
            None => debug!(kind = self.request.kind(), "ignoring timeout"),
        }
    }
}

impl<M: Model> Subscriber for Shared<M> {
    fn on_notification(&self, key: SubscriptionKey, notification: Notification) {
        let Notification {
            interface,
            protocol,
            event,
        } = notification;
        let mut state = lock(&self.state);
        if state.subscription.as_ref().map(Subscription::key) != Some(key) {
            debug!(?key, "dropping notification for a stopped query");
            return;
        }

        match event {
            RawEvent::Found(record) => {
                let Some(item) = M::decode(interface, protocol, record) else {
                    warn!(kind = self.request.kind(), "unexpected record found");
                    return;
                };
                M::found(&mut state.results, &item);
                let handlers = state.found.snapshot();
                drop(state);
                fan_out(&handlers, &item);
            }
            RawEvent::Removed(record) => {
                let Some(item) = M::decode(interface, protocol, record) else {
                    warn!(kind = self.request.kind(), "unexpected record removed");
                    return;
                };
                self.lose(state, Some(item));
            }
            RawEvent::Timeout => self.lose(state, None),
        }
    }
}

/// The machinery shared by all browsers and resolvers
///
/// Subscribes lazily when the first listener is added, and
/// unsubscribes when the last one is removed. The query's own lock is
/// always taken before the connection's.
pub(crate) struct Query<M: Model> {
    shared: Arc<Shared<M>>,
}

impl<M: Model> Query<M> {
    pub(crate) fn new(connection: ConnectionRef, request: Request) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection,
                request,
                state: Mutex::new(State {
                    found: Listeners::default(),
                    lost: Listeners::default(),
                    results: M::Results::default(),
                    subscription: None,
                }),
            }),
        }
    }

    pub(crate) fn request(&self) -> &Request {
        &self.shared.request
    }

    pub(crate) fn add_found_listener(
        &self,
        handler: Handler<M::Item>,
    ) -> Result<ListenerId> {
        self.shared.add_listener(handler, State::found_list)
    }

    pub(crate) fn add_lost_listener(
        &self,
        handler: Handler<M::Lost>,
    ) -> Result<ListenerId> {
        self.shared.add_listener(handler, State::lost_list)
    }

    pub(crate) fn remove_found_listener(&self, id: ListenerId) -> bool {
        self.shared.remove_listener(id, State::found_list)
    }

    pub(crate) fn remove_lost_listener(&self, id: ListenerId) -> bool {
        self.shared.remove_listener(id, State::lost_list)
    }

    pub(crate) fn with_results<T>(&self, f: impl FnOnce(&M::Results) -> T) -> T {
        f(&lock(&self.shared.state).results)
    }

    pub(crate) fn is_active(&self) -> bool {
        lock(&self.shared.state).subscription.is_some()
    }

    pub(crate) fn dispose(&self) {
        Shared::stop(&mut lock(&self.shared.state), true);
    }

    #[cfg(feature = "async")]
    pub(crate) fn found_stream(&self) -> Result<ListenerStream<M::Item>> {
        self.stream(State::found_list)
    }

    #[cfg(feature = "async")]
    pub(crate) fn lost_stream(&self) -> Result<ListenerStream<M::Lost>>
    where
        M::Lost: Clone,
    {
        self.stream(State::lost_list)
    }

    #[cfg(feature = "async")]
    fn stream<T: Clone + Send + Sync + 'static>(
        &self,
        list: ListSelector<M, T>,
    ) -> Result<ListenerStream<T>> {
        let (tx, rx) = tokio::sync::mpsc::channel(crate::stream::CAPACITY);
        let handler: Handler<T> = Arc::new(move |item: &T| {
            if tx.try_send(item.clone()).is_err() {
                warn!("stream is full or closed; dropping event");
            }
        });
        let id = self.shared.add_listener(handler, list)?;
        let shared = Arc::downgrade(&self.shared);
        Ok(ListenerStream::new(rx, move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove_listener(id, list);
            }
        }))
    }
}

impl<M: Model> Drop for Query<M> {
    fn drop(&mut self) {
        self.dispose();
    }
}
