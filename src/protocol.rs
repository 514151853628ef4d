// Wire-visible types shared by the inbound (acquire/release/stat) and
// outbound (revoke/retry) RPC surfaces.
//
// The actual RPC transport is out of scope for this crate (see the crate
// root docs); these are the types an embedding transport marshals on and
// off the wire around calls into `LockServerCache`.

use std::fmt;

/// Opaque client-chosen lock identifier.
pub type LockId = u64;

/// Client-chosen monotonic transaction id, scoped to (client, lock).
pub type Xid = u64;

/// Stable identifier for a lock-cache client instance and its RPC endpoint.
///
/// Newtype over `String` rather than a bare `String` so it can be ordered
/// deterministically (`BTreeSet`/`BTreeMap` keys) without every call site
/// having to remember that ordering matters here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reply code returned by `acquire`/`release`/`stat`.
///
/// Numeric values are part of the client-visible protocol and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum ReplyCode {
    Ok = 0,
    Retry = 2,
    Noent = 3,
    Rpcerr = 4,
}

impl ReplyCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyCode::Ok => "OK",
            ReplyCode::Retry => "RETRY",
            ReplyCode::Noent => "NOENT",
            ReplyCode::Rpcerr => "RPCERR",
        };
        f.write_str(name)
    }
}
