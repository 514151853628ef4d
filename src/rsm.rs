// Trait boundaries to the two collaborators this crate treats as external:
// the RSM/consensus layer (`PrimaryOracle`) and the client-side lock cache
// reachable through the RPC transport (`ClientDirectory`). Both are provided
// by an embedder; `rusty-lockd` never dials out or listens on a socket
// itself.

use crate::protocol::{ClientId, LockId, Xid};

/// Answers "is this replica currently authoritative?" Consulted at the top
/// of every `acquire`/`release` under the table lock; only the primary
/// enqueues revoke/retry callbacks.
pub trait PrimaryOracle: Send + Sync {
    fn is_primary(&self) -> bool;
}

/// Resolves a client id to a live outbound handle and performs the revoke
/// or retry call, at dispatch time rather than at enqueue time — a client
/// that disconnects and reconnects under the same id must still be
/// reachable by a callback enqueued before it went away.
///
/// Implementations are expected to drop the callback silently when no
/// handle can be bound (the client has died or moved); protocol safety does
/// not depend on delivery, only the eventual observable effect it would
/// have caused (a release, or a retried acquire).
pub trait ClientDirectory: Send + Sync {
    /// Ask `client` to release `lid` soon; `xid` is the client's latest
    /// recorded transaction id for this lock, for its own correlation.
    fn revoke(&self, client: &ClientId, lid: LockId, xid: Xid);

    /// Hint to `client` that `lid` may now be acquirable; `xid` is as above.
    fn retry(&self, client: &ClientId, lid: LockId, xid: Xid);
}
