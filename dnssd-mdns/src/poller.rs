use dnssd_client::{Delivery, Error, Poller, Wait};
use flume::{Receiver, RecvError, Selector, Sender};
use mdns_sd::{HostnameResolutionEvent, ServiceEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Identifies one mdns-sd channel for as long as the gateway uses it
pub(crate) type SourceId = u64;

/// A channel of events from the mdns-sd daemon
#[derive(Clone)]
pub(crate) enum Channel {
    Browse(Receiver<ServiceEvent>),
    Host(Receiver<HostnameResolutionEvent>),
}

#[derive(Clone)]
pub(crate) struct Source {
    pub id: SourceId,
    pub channel: Channel,
}

/// Something received from one source
#[derive(Debug)]
pub(crate) enum Incoming {
    Service(SourceId, ServiceEvent),
    Host(SourceId, HostnameResolutionEvent),
    /// The daemon has dropped its end of the channel
    Closed(SourceId),
    /// Produced by the gateway itself, for its next dispatch
    Local(Delivery),
}

enum Selected {
    Wake,
    Service(usize, Result<ServiceEvent, RecvError>),
    Host(usize, Result<HostnameResolutionEvent, RecvError>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/** The blocking half of an [`MdnsGateway`](crate::MdnsGateway)
 *
 * Waits on every channel the gateway currently has open to the
 * daemon, plus a wake-up channel, using a `flume::Selector`. The
 * selector consumes whatever it receives, so each event is parked
 * in a queue for the gateway's next `dispatch`.
 */
pub(crate) struct MdnsPoller {
    sources: Mutex<Vec<Source>>,
    ready: Mutex<VecDeque<Incoming>>,
    deadline: Mutex<Option<Instant>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    quit: AtomicBool,
}

impl MdnsPoller {
    pub(crate) fn new() -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            sources: Mutex::new(Vec::new()),
            ready: Mutex::new(VecDeque::new()),
            deadline: Mutex::new(None),
            wake_tx,
            wake_rx,
            quit: AtomicBool::new(false),
        }
    }

    pub(crate) fn add_source(&self, source: Source) {
        lock(&self.sources).push(source);
        self.wakeup();
    }

    pub(crate) fn remove_source(&self, id: SourceId) {
        lock(&self.sources).retain(|s| s.id != id);
        self.wakeup();
    }

    /// Wake up no later than `deadline`, even if nothing arrives
    pub(crate) fn set_deadline(&self, deadline: Option<Instant>) {
        let mut current = lock(&self.deadline);
        if *current != deadline {
            *current = deadline;
            drop(current);
            self.wakeup();
        }
    }

    pub(crate) fn take_ready(&self) -> Vec<Incoming> {
        lock(&self.ready).drain(..).collect()
    }

    /// Hand `delivery` to the event loop
    pub(crate) fn post(&self, delivery: Delivery) {
        self.park(Incoming::Local(delivery));
        self.wakeup();
    }

    fn park(&self, incoming: Incoming) {
        lock(&self.ready).push_back(incoming);
    }
}

impl Poller for MdnsPoller {
    fn wait(&self) -> Result<Wait, Error> {
        loop {
            if self.quit.load(Ordering::SeqCst) {
                return Ok(Wait::Quit);
            }
            if !lock(&self.ready).is_empty() {
                return Ok(Wait::Ready);
            }
            let deadline = *lock(&self.deadline);
            if deadline.is_some_and(|d| d <= Instant::now()) {
                return Ok(Wait::Ready);
            }

            let sources = lock(&self.sources).clone();
            let mut selector =
                Selector::new().recv(&self.wake_rx, |_| Selected::Wake);
            for (index, source) in sources.iter().enumerate() {
                selector = match &source.channel {
                    Channel::Browse(rx) => selector
                        .recv(rx, move |r| Selected::Service(index, r)),
                    Channel::Host(rx) => {
                        selector.recv(rx, move |r| Selected::Host(index, r))
                    }
                };
            }
            let selected = match deadline {
                Some(deadline) => match selector.wait_deadline(deadline) {
                    Ok(selected) => selected,
                    Err(_) => return Ok(Wait::Ready),
                },
                None => selector.wait(),
            };

            match selected {
                Selected::Wake => {}
                Selected::Service(index, Ok(event)) => {
                    self.park(Incoming::Service(sources[index].id, event));
                }
                Selected::Host(index, Ok(event)) => {
                    self.park(Incoming::Host(sources[index].id, event));
                }
                Selected::Service(index, Err(_))
                | Selected::Host(index, Err(_)) => {
                    let id = sources[index].id;
                    debug!(id, "mdns channel closed");
                    lock(&self.sources).retain(|s| s.id != id);
                    self.park(Incoming::Closed(id));
                }
            }
        }
    }

    fn wakeup(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wakeup();
    }
}
