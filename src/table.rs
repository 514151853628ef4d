// Module A — the lock table.
//
// An in-memory map from lock id to per-lock state. All reading and mutation
// happens while the single table mutex is held (by the handlers in
// `handlers.rs` and the snapshot codec in `snapshot.rs`); this module only
// owns the map and the per-lock record shape, not the protocol transitions.
//
// `BTreeMap`/`BTreeSet` are used rather than their hashed counterparts
// specifically so that iterating a record (snapshot encoding) and picking a
// waiter (release's "deterministic smallest id" rule) both fall out of the
// container's natural order instead of requiring an explicit sort.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::protocol::{ClientId, LockId, ReplyCode, Xid};

/// Per-lock state. Created on first reference to a lock id and never
/// removed for the lifetime of the server — an absent record means the
/// lock id has genuinely never been referenced.
#[derive(Debug)]
pub struct LockRecord {
    /// Is the lock currently granted?
    pub held: bool,
    /// Current grantee when `held`.
    pub holder: Option<ClientId>,
    /// A revoke has been enqueued for the current holder; suppresses
    /// duplicate revokes. Never explicitly cleared on release — it is
    /// overwritten the next time the lock is granted.
    pub revoked: bool,
    /// Clients that received `RETRY` and are awaiting a retry notification.
    pub waiters: BTreeSet<ClientId>,
    /// Greatest xid seen from each client for this lock.
    pub highest_xid: BTreeMap<ClientId, Xid>,
    /// Cached reply for the outstanding acquire request at
    /// `highest_xid[client]`.
    pub acquire_reply: BTreeMap<ClientId, ReplyCode>,
    /// Marks that `release` at `highest_xid[client]` has already been
    /// processed for a client. The value is always `ReplyCode::Ok` — release
    /// never caches anything else — so presence, not the value, is what a
    /// duplicate release actually tests; see `DESIGN.md` for why this is a
    /// `ReplyCode` map and not the xid the original source stored here.
    pub release_reply: BTreeMap<ClientId, ReplyCode>,
    /// Cumulative count of successful acquire grants for this lock id.
    /// Backs the `stat` diagnostic; not part of the replicated protocol
    /// state (not serialized by the snapshot codec).
    pub grants: AtomicU64,
}

impl Default for LockRecord {
    fn default() -> Self {
        Self {
            held: false,
            holder: None,
            revoked: false,
            waiters: BTreeSet::new(),
            highest_xid: BTreeMap::new(),
            acquire_reply: BTreeMap::new(),
            release_reply: BTreeMap::new(),
            grants: AtomicU64::new(0),
        }
    }
}

impl LockRecord {
    /// Invariant 1: held iff holder is set.
    pub fn invariant_held_holder(&self) -> bool {
        self.held == self.holder.is_some()
    }

    /// Invariant 2: the holder is never also a waiter.
    pub fn invariant_holder_not_waiting(&self) -> bool {
        match &self.holder {
            Some(h) => !self.waiters.contains(h),
            None => true,
        }
    }

    /// Invariant 4: at most one revoke outstanding per lock implies held.
    pub fn invariant_revoked_implies_held(&self) -> bool {
        !self.revoked || self.held
    }

    pub fn record_grant(&self) {
        self.grants.fetch_add(1, Ordering::Relaxed);
    }

    pub fn grant_count(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }
}

/// The lock table: a mapping from lock id to per-lock state, guarded by a
/// single coarse mutex (see the crate's concurrency notes for why one lock
/// suffices).
#[derive(Default)]
pub struct LockTable {
    inner: Mutex<BTreeMap<LockId, LockRecord>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Take the table lock for the duration of `f`. Every handler and the
    /// snapshot codec go through this single entry point so the mutex is
    /// never held longer than one call's worth of work.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut BTreeMap<LockId, LockRecord>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
