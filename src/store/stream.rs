//! The consumer side of a live query.

use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tokio::sync::mpsc;

use super::record::LiveQueryRecord;
use super::StoreInner;
use crate::graphql::Response;

/// The pull side of a live query's result sequence.
///
/// Results arrive in the order the scheduler produced them: the initial
/// execution first, then one result per effective re-execution. Dropping the
/// stream (or calling [`close`](LiveQueryStream::close)) disposes the
/// subscription: the record leaves the index, later invalidations of its
/// identifiers become no-ops, and an in-flight execution finishes with its
/// result discarded.
pub struct LiveQueryStream {
    store: Arc<StoreInner>,
    record: Arc<LiveQueryRecord>,
    receiver: mpsc::Receiver<Response>,
    closed: bool,
}

impl LiveQueryStream {
    pub(crate) fn new(
        store: Arc<StoreInner>,
        record: Arc<LiveQueryRecord>,
        receiver: mpsc::Receiver<Response>,
    ) -> Self {
        Self {
            store,
            record,
            receiver,
            closed: false,
        }
    }

    /// Signal disinterest without dropping the handle: every pending and
    /// future poll resolves to end-of-stream and store-side resources are
    /// released immediately.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.receiver.close();
        self.store.terminate(&self.record);
    }
}

impl Stream for LiveQueryStream {
    type Item = Response;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.receiver.poll_recv(cx)
    }
}

impl Drop for LiveQueryStream {
    fn drop(&mut self) {
        self.close();
    }
}
