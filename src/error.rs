// Error types for the lock cache core.
//
// Protocol-level failures (stale xid, wrong replica, unknown lock) are never
// `Err` values — they are `ReplyCode`s returned on the `Ok` path, per the
// acquire/release contract. `LockCacheError` covers only the plumbing that
// sits outside that contract: malformed snapshot bytes and config loading.

use thiserror::Error;

use crate::snapshot::SnapshotError;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum LockCacheError {
    #[error("snapshot codec error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LockCacheError>;
