use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How many undelivered events a stream buffers before dropping more
pub(crate) const CAPACITY: usize = 100;

type Detach = Box<dyn FnOnce() + Send + Sync>;

/// Query results as an asynchronous stream
///
/// Obtained from methods such as
/// [`Browser::found_stream`](crate::Browser::found_stream). Behind the
/// scenes this is just another listener on the query, so it counts
/// towards keeping the query active; dropping the stream removes that
/// listener again.
///
/// Events are buffered, but if the consumer falls more than a hundred
/// events behind, further events are dropped (with a warning logged).
pub struct ListenerStream<T> {
    receiver: ReceiverStream<T>,
    detach: Option<Detach>,
}

impl<T> ListenerStream<T> {
    pub(crate) fn new(
        receiver: mpsc::Receiver<T>,
        detach: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver: ReceiverStream::new(receiver),
            detach: Some(Box::new(detach)),
        }
    }
}

impl<T> Stream for ListenerStream<T> {
    type Item = T;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl<T> Drop for ListenerStream<T> {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
