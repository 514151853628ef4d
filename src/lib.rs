// RustyLockd — the core of a replicated caching lock server.
//
// This crate implements the lock-state machine an embedding replicated
// state machine (RSM) drives: per-lock `acquire`/`release` with caching
// clients, asynchronous `revoke`/`retry` callbacks, duplicate-request
// suppression across retries and failover, and deterministic full-table
// snapshots for state transfer to a new primary.
//
// The RSM itself, the RPC transport, and the client-side lock cache are
// out of scope and modeled as the trait boundaries in `rsm`; see
// `handlers::LockServerCache` for the crate's one public entry point.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod rsm;
pub mod snapshot;
pub mod table;

pub use config::ServerConfig;
pub use error::{LockCacheError, Result};
pub use handlers::LockServerCache;
pub use protocol::{ClientId, LockId, ReplyCode, Xid};
pub use rsm::{ClientDirectory, PrimaryOracle};

/// Crate version, following the teacher's `VERSION` convention for banner
/// output and client/server handshake logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
