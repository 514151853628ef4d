// Modules B, F — the acquire/release handlers and the primary gate /
// duplicate-suppression logic that guards them. `LockServerCache` is the
// crate's one public entry point: the shape an embedding RSM calls into
// once it has totally ordered an operation across replicas.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::ServerConfig;
use crate::dispatch::{self, CallbackDispatcher, CallbackKind};
use crate::protocol::{ClientId, LockId, ReplyCode, Xid};
use crate::rsm::{ClientDirectory, PrimaryOracle};
use crate::snapshot::{self, SnapshotError};
use crate::table::LockTable;

/// The lock-state machine core. Construct one per replica; an embedding RSM
/// calls `acquire`/`release`/`stat` after it orders an operation, and
/// `marshal_state`/`unmarshal_state` during state transfer.
pub struct LockServerCache {
    table: LockTable,
    primary: Arc<dyn PrimaryOracle>,
    // `Option` so `Drop` can take the sender out and close the channel
    // before joining the worker thread, rather than leaving it detached.
    revoke: Option<CallbackDispatcher>,
    retry: Option<CallbackDispatcher>,
    revoke_worker: Option<JoinHandle<()>>,
    retry_worker: Option<JoinHandle<()>>,
}

impl LockServerCache {
    /// Construct a server with default configuration — threaded revoke/retry
    /// dispatchers, per §5's scheduling model.
    pub fn new(primary: Arc<dyn PrimaryOracle>, directory: Arc<dyn ClientDirectory>) -> Self {
        Self::with_config(&ServerConfig::default(), primary, directory)
    }

    /// Construct a server honoring `config.synchronous_dispatch`: when set,
    /// revoke/retry callbacks run inline on the enqueueing thread instead of
    /// through a dedicated worker, so tests can assert on dispatch effects
    /// without racing a background thread.
    pub fn with_config(
        config: &ServerConfig,
        primary: Arc<dyn PrimaryOracle>,
        directory: Arc<dyn ClientDirectory>,
    ) -> Self {
        let (revoke, retry, revoke_worker, retry_worker) = if config.synchronous_dispatch {
            let revoke = dispatch::inline(CallbackKind::Revoke, directory.clone());
            let retry = dispatch::inline(CallbackKind::Retry, directory);
            (revoke, retry, None, None)
        } else {
            let (revoke, revoke_worker) = dispatch::spawn(CallbackKind::Revoke, directory.clone());
            let (retry, retry_worker) = dispatch::spawn(CallbackKind::Retry, directory);
            (revoke, retry, Some(revoke_worker), Some(retry_worker))
        };

        Self {
            table: LockTable::new(),
            primary,
            revoke: Some(revoke),
            retry: Some(retry),
            revoke_worker,
            retry_worker,
        }
    }

    /// §4.B — grant, queue, or bounce an acquire request.
    pub fn acquire(&self, lid: LockId, id: ClientId, xid: Xid) -> ReplyCode {
        if !self.primary.is_primary() {
            tracing::info!(lid, client = %id, "acquire rejected: not primary");
            return ReplyCode::Rpcerr;
        }

        let mut to_revoke: Option<(ClientId, LockId, Xid)> = None;

        let reply = self.table.with_lock(|map| {
            let rec = map.entry(lid).or_default();

            let stored = rec.highest_xid.get(&id).copied();
            match stored {
                None => {
                    // New request from a client never seen on this lock
                    // before. Insert unconditionally rather than assuming a
                    // prior entry exists (the resolved Open Question in
                    // `spec.md` §9).
                    rec.highest_xid.insert(id.clone(), xid);
                    rec.release_reply.remove(&id);
                    Self::grant_or_queue(rec, lid, &id, xid, &mut to_revoke)
                }
                Some(prev) if prev < xid => {
                    rec.highest_xid.insert(id.clone(), xid);
                    rec.release_reply.remove(&id);
                    Self::grant_or_queue(rec, lid, &id, xid, &mut to_revoke)
                }
                Some(prev) if prev == xid => {
                    // Duplicate: RSM re-execution or an RPC retry. Idempotent
                    // by construction — return the cached reply, touch
                    // nothing else.
                    rec.acquire_reply.get(&id).copied().unwrap_or(ReplyCode::Rpcerr)
                }
                Some(_) => {
                    tracing::warn!(lid, client = %id, xid, "acquire with stale xid");
                    ReplyCode::Rpcerr
                }
            }
        });

        if let Some((client, lid, xid)) = to_revoke {
            self.revoke_dispatcher().enqueue(client, lid, xid);
        }

        reply
    }

    fn revoke_dispatcher(&self) -> &CallbackDispatcher {
        self.revoke.as_ref().expect("revoke dispatcher only taken during drop")
    }

    fn retry_dispatcher(&self) -> &CallbackDispatcher {
        self.retry.as_ref().expect("retry dispatcher only taken during drop")
    }

    /// Shared tail of the "new request" branch of `acquire`: either grant
    /// the lock immediately or queue the caller as a waiter, enqueuing at
    /// most one outstanding revoke either way.
    fn grant_or_queue(
        rec: &mut crate::table::LockRecord,
        lid: LockId,
        id: &ClientId,
        xid: Xid,
        to_revoke: &mut Option<(ClientId, LockId, Xid)>,
    ) -> ReplyCode {
        let reply = if rec.held {
            rec.waiters.insert(id.clone());
            if !rec.revoked {
                rec.revoked = true;
                let holder = rec.holder.clone().expect("held implies holder is set");
                let holder_xid = rec.highest_xid.get(&holder).copied().unwrap_or(0);
                *to_revoke = Some((holder, lid, holder_xid));
            }
            ReplyCode::Retry
        } else {
            rec.held = true;
            rec.holder = Some(id.clone());
            rec.revoked = false;
            rec.waiters.remove(id);
            rec.record_grant();

            if !rec.waiters.is_empty() {
                // A waiter was already queued when this grant landed: revoke
                // the fresh holder immediately so it does not starve the
                // waiter that lost the race.
                rec.revoked = true;
                *to_revoke = Some((id.clone(), lid, xid));
            }
            ReplyCode::Ok
        };

        rec.acquire_reply.insert(id.clone(), reply);
        reply
    }

    /// §4.C — release a held lock, waking the next waiter if any.
    pub fn release(&self, lid: LockId, id: ClientId, xid: Xid) -> ReplyCode {
        if !self.primary.is_primary() {
            tracing::info!(lid, client = %id, "release rejected: not primary");
            return ReplyCode::Rpcerr;
        }

        let mut to_retry: Option<(ClientId, LockId, Xid)> = None;

        let reply = self.table.with_lock(|map| {
            let rec = match map.get_mut(&lid) {
                Some(rec) => rec,
                None => {
                    tracing::warn!(lid, client = %id, "release on unknown lock");
                    return ReplyCode::Noent;
                }
            };

            let stored = match rec.highest_xid.get(&id).copied() {
                Some(stored) => stored,
                None => {
                    tracing::warn!(lid, client = %id, "release without a prior acquire");
                    return ReplyCode::Rpcerr;
                }
            };

            if xid < stored {
                tracing::warn!(lid, client = %id, xid, stored, "release with stale xid");
                return ReplyCode::Rpcerr;
            }

            if rec.release_reply.contains_key(&id) {
                // Duplicate release for an already-processed xid.
                return ReplyCode::Ok;
            }

            rec.held = false;
            rec.holder = None;
            rec.release_reply.insert(id.clone(), ReplyCode::Ok);

            if let Some(waiter) = rec.waiters.iter().next().cloned() {
                let waiter_xid = rec.highest_xid.get(&waiter).copied().unwrap_or(0);
                to_retry = Some((waiter, lid, waiter_xid));
            }

            ReplyCode::Ok
        });

        if let Some((client, lid, xid)) = to_retry {
            self.retry_dispatcher().enqueue(client, lid, xid);
        }

        reply
    }

    /// §4.G — diagnostic endpoint. Returns the cumulative grant count for
    /// `lid`, or 0 for a lock id never referenced; not part of the
    /// replicated protocol, so it takes no primary-gate check.
    pub fn stat(&self, lid: LockId) -> (ReplyCode, u64) {
        let count = self.table.with_lock(|map| map.get(&lid).map(|r| r.grant_count()).unwrap_or(0));
        (ReplyCode::Ok, count)
    }

    /// §4.F — produce a deterministic snapshot of the full table.
    pub fn marshal_state(&self) -> Vec<u8> {
        self.table.with_lock(|map| snapshot::marshal(map))
    }

    /// §4.F — install a snapshot produced by `marshal_state` (on this or
    /// any other replica that applied the same operation sequence).
    /// Replaces the table outright; callback queues are untouched by
    /// design — they hold no replicated state and any pending entries
    /// belong to the replica's own in-flight work, not the snapshot.
    pub fn unmarshal_state(&self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let restored = snapshot::unmarshal(bytes)?;
        self.table.with_lock(|map| {
            map.clear();
            map.extend(restored);
        });
        Ok(())
    }
}

impl Drop for LockServerCache {
    fn drop(&mut self) {
        // Drop the senders first so the workers' `recv` loops see a closed
        // channel and return, then join rather than leave them detached.
        drop(self.revoke.take());
        drop(self.retry.take());

        if let Some(worker) = self.revoke_worker.take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.retry_worker.take() {
            let _ = worker.join();
        }
    }
}
