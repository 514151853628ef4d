// Modules C and D — the revoke and retry dispatchers.
//
// Both are the same shape: a FIFO of `(client, lid, xid)` entries drained by
// one dedicated thread that calls out through a `ClientDirectory`. A plain
// `std::thread` rather than an async task, because the table lock this
// crate protects is only ever taken by short, synchronous, CPU-bound work
// (see `handlers.rs`) — there is no runtime to hand suspension points to,
// and the original protocol this implements is itself one pthread per
// dispatcher. `crossbeam::channel::unbounded` gives the blocking-dequeue,
// non-blocking-enqueue pair the table lock needs (enqueue happens while
// the lock is held, so it must never block).

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Sender};

use crate::protocol::{ClientId, LockId, Xid};
use crate::rsm::ClientDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Revoke,
    Retry,
}

impl CallbackKind {
    fn thread_name(self) -> &'static str {
        match self {
            CallbackKind::Revoke => "lockd-revoker",
            CallbackKind::Retry => "lockd-retryer",
        }
    }
}

struct CallbackEntry {
    client: ClientId,
    lid: LockId,
    xid: Xid,
}

fn deliver(kind: CallbackKind, directory: &dyn ClientDirectory, entry: &CallbackEntry) {
    match kind {
        CallbackKind::Revoke => {
            tracing::debug!(client = %entry.client, lid = entry.lid, xid = entry.xid, "dispatching revoke");
            directory.revoke(&entry.client, entry.lid, entry.xid);
        }
        CallbackKind::Retry => {
            tracing::debug!(client = %entry.client, lid = entry.lid, xid = entry.xid, "dispatching retry");
            directory.retry(&entry.client, entry.lid, entry.xid);
        }
    }
}

#[derive(Clone)]
enum Channel {
    /// Delivered by a dedicated worker thread draining `Sender`'s paired
    /// receiver — the default, production mode.
    Threaded(Sender<CallbackEntry>),
    /// Delivered inline, on the enqueueing thread, with no worker at all.
    /// Only for `ServerConfig::synchronous_dispatch`, which tests use to
    /// assert on dispatch effects without racing a background thread.
    Inline(CallbackKind, Arc<dyn ClientDirectory>),
}

/// A producer handle for a dispatcher's queue. Cheap to clone; every
/// `LockServerCache` holds one of these per dispatcher kind and calls
/// `enqueue` while the table lock is held.
#[derive(Clone)]
pub struct CallbackDispatcher {
    kind: CallbackKind,
    channel: Channel,
}

impl CallbackDispatcher {
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    /// Enqueue a callback. Non-blocking and infallible from the caller's
    /// perspective: if the worker thread has already shut down the entry is
    /// dropped, which is the same "lost callback, liveness only" outcome as
    /// a callback the worker picked up but couldn't deliver. In
    /// `synchronous_dispatch` mode the callback runs immediately instead.
    pub fn enqueue(&self, client: ClientId, lid: LockId, xid: Xid) {
        let entry = CallbackEntry { client, lid, xid };
        match &self.channel {
            Channel::Threaded(sender) => {
                let _ = sender.send(entry);
            }
            Channel::Inline(kind, directory) => deliver(*kind, directory.as_ref(), &entry),
        }
    }
}

/// Start a dispatcher's background worker. Returns the producer handle and
/// the worker's `JoinHandle`, which callers join on shutdown (dropping the
/// last `CallbackDispatcher` clone closes the channel and lets `recv`
/// return, ending the loop).
pub fn spawn(kind: CallbackKind, directory: Arc<dyn ClientDirectory>) -> (CallbackDispatcher, JoinHandle<()>) {
    let (sender, receiver) = unbounded::<CallbackEntry>();

    let worker = thread::Builder::new()
        .name(kind.thread_name().to_string())
        .spawn(move || {
            while let Ok(entry) = receiver.recv() {
                deliver(kind, directory.as_ref(), &entry);
            }
            tracing::debug!(kind = ?kind, "dispatcher shutting down");
        })
        .expect("failed to spawn dispatcher thread");

    (CallbackDispatcher { kind, channel: Channel::Threaded(sender) }, worker)
}

/// Build a dispatcher that delivers every callback inline with no worker
/// thread, for `ServerConfig::synchronous_dispatch`.
pub fn inline(kind: CallbackKind, directory: Arc<dyn ClientDirectory>) -> CallbackDispatcher {
    CallbackDispatcher { kind, channel: Channel::Inline(kind, directory) }
}
