// Module E — snapshot codec.
//
// `marshal`/`unmarshal` are the deterministic, self-contained serialization
// of the entire lock table used by the RSM during state transfer to a new
// or lagging replica. Deterministic means: two replicas that applied the
// same operation sequence produce byte-identical output, which in turn
// means canonical iteration order matters as much as the byte layout
// itself — see the module-level ordering note below.
//
// Layout (all integers big-endian, strings length-prefixed UTF-8, bool as
// one byte):
//
//   lock_count: u32
//   repeat lock_count times, lock ids ascending:
//     lid: u64
//     held: bool
//     revoked: bool
//     holder: string (empty when `held` is false)
//     waiters_count: u32, then that many strings, ascending
//     highest_xid_count: u32, then that many (string, u64) pairs, key ascending
//     acquire_reply_count: u32, then that many (string, i32) pairs, key ascending
//     release_reply_count: u32, then that many (string, i32) pairs, key ascending
//
// Revoke/retry queues are never part of the snapshot: they hold live
// dispatch state that is meaningless on a different replica and is rebuilt
// lazily as clients re-drive requests after failover.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;

use thiserror::Error;

use crate::protocol::{ClientId, LockId, ReplyCode, Xid};
use crate::table::LockRecord;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data while reading {field}")]
    Truncated { field: &'static str },

    #[error("invalid UTF-8 in snapshot string field {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("unknown reply code {value} while decoding {field}")]
    UnknownReplyCode { field: &'static str, value: i32 },

    #[error("trailing bytes after a well-formed snapshot ({remaining} left over)")]
    TrailingData { remaining: usize },
}

/// Serialize the full lock table. Canonical order: `BTreeMap`/`BTreeSet`
/// already iterate in ascending key order, so no explicit sort is needed —
/// that is the reason the table uses ordered containers in the first
/// place (see `table.rs`).
pub fn marshal(table: &BTreeMap<LockId, LockRecord>) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, table.len() as u32);

    for (lid, rec) in table {
        write_u64(&mut buf, *lid);
        write_bool(&mut buf, rec.held);
        write_bool(&mut buf, rec.revoked);
        write_str(&mut buf, rec.holder.as_ref().map(ClientId::as_str).unwrap_or(""));

        write_u32(&mut buf, rec.waiters.len() as u32);
        for w in &rec.waiters {
            write_str(&mut buf, w.as_str());
        }

        write_u32(&mut buf, rec.highest_xid.len() as u32);
        for (id, xid) in &rec.highest_xid {
            write_str(&mut buf, id.as_str());
            write_u64(&mut buf, *xid);
        }

        write_u32(&mut buf, rec.acquire_reply.len() as u32);
        for (id, reply) in &rec.acquire_reply {
            write_str(&mut buf, id.as_str());
            write_i32(&mut buf, reply.as_i32());
        }

        write_u32(&mut buf, rec.release_reply.len() as u32);
        for (id, reply) in &rec.release_reply {
            write_str(&mut buf, id.as_str());
            write_i32(&mut buf, reply.as_i32());
        }
    }

    buf
}

/// Restore the lock table from bytes produced by `marshal`. Rejects
/// truncated or malformed input instead of panicking, since the snapshot
/// bytes arrive over the (untrusted, out-of-scope) RSM transport.
pub fn unmarshal(bytes: &[u8]) -> Result<BTreeMap<LockId, LockRecord>, SnapshotError> {
    let mut cur = Cursor { buf: bytes, pos: 0 };
    let mut table = BTreeMap::new();

    let lock_count = cur.read_u32("lock_count")?;
    for _ in 0..lock_count {
        let lid = cur.read_u64("lid")?;
        let held = cur.read_bool("held")?;
        let revoked = cur.read_bool("revoked")?;
        let holder_str = cur.read_str("holder")?;
        let holder = if holder_str.is_empty() {
            None
        } else {
            Some(ClientId::new(holder_str))
        };

        let waiters_count = cur.read_u32("waiters_count")?;
        let mut waiters = BTreeSet::new();
        for _ in 0..waiters_count {
            waiters.insert(ClientId::new(cur.read_str("waiters[i]")?));
        }

        let highest_xid_count = cur.read_u32("highest_xid_count")?;
        let mut highest_xid: BTreeMap<ClientId, Xid> = BTreeMap::new();
        for _ in 0..highest_xid_count {
            let id = ClientId::new(cur.read_str("highest_xid[i].id")?);
            let xid = cur.read_u64("highest_xid[i].xid")?;
            highest_xid.insert(id, xid);
        }

        let acquire_reply_count = cur.read_u32("acquire_reply_count")?;
        let mut acquire_reply = BTreeMap::new();
        for _ in 0..acquire_reply_count {
            let id = ClientId::new(cur.read_str("acquire_reply[i].id")?);
            let reply = cur.read_reply_code("acquire_reply[i].reply")?;
            acquire_reply.insert(id, reply);
        }

        let release_reply_count = cur.read_u32("release_reply_count")?;
        let mut release_reply = BTreeMap::new();
        for _ in 0..release_reply_count {
            let id = ClientId::new(cur.read_str("release_reply[i].id")?);
            let reply = cur.read_reply_code("release_reply[i].reply")?;
            release_reply.insert(id, reply);
        }

        table.insert(
            lid,
            LockRecord {
                held,
                holder,
                revoked,
                waiters,
                highest_xid,
                acquire_reply,
                release_reply,
                grants: Default::default(),
            },
        );
    }

    if cur.pos != cur.buf.len() {
        return Err(SnapshotError::TrailingData {
            remaining: cur.buf.len() - cur.pos,
        });
    }

    Ok(table)
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(v as u8);
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], SnapshotError> {
        if self.pos + n > self.buf.len() {
            return Err(SnapshotError::Truncated { field });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, SnapshotError> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, SnapshotError> {
        let bytes = self.take(8, field)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, SnapshotError> {
        let bytes = self.take(4, field)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_bool(&mut self, field: &'static str) -> Result<bool, SnapshotError> {
        let bytes = self.take(1, field)?;
        Ok(bytes[0] != 0)
    }

    fn read_str(&mut self, field: &'static str) -> Result<String, SnapshotError> {
        let len = self.read_u32(field)? as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::InvalidUtf8 { field })
    }

    fn read_reply_code(&mut self, field: &'static str) -> Result<ReplyCode, SnapshotError> {
        let value = self.read_i32(field)?;
        ReplyCode::try_from(value).map_err(|_| SnapshotError::UnknownReplyCode { field, value })
    }
}

impl TryFrom<i32> for ReplyCode {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReplyCode::Ok),
            2 => Ok(ReplyCode::Retry),
            3 => Ok(ReplyCode::Noent),
            4 => Ok(ReplyCode::Rpcerr),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientId;

    fn sample_table() -> BTreeMap<LockId, LockRecord> {
        let mut table = BTreeMap::new();

        let mut held = LockRecord::default();
        held.held = true;
        held.holder = Some(ClientId::new("A"));
        held.revoked = true;
        held.waiters.insert(ClientId::new("B"));
        held.waiters.insert(ClientId::new("C"));
        held.highest_xid.insert(ClientId::new("A"), 1);
        held.highest_xid.insert(ClientId::new("B"), 1);
        held.highest_xid.insert(ClientId::new("C"), 1);
        held.acquire_reply.insert(ClientId::new("A"), ReplyCode::Ok);
        held.acquire_reply.insert(ClientId::new("B"), ReplyCode::Retry);
        table.insert(7, held);

        let mut free = LockRecord::default();
        free.release_reply.insert(ClientId::new("X"), ReplyCode::Ok);
        table.insert(42, free);

        table
    }

    #[test]
    fn round_trip_is_identity() {
        let table = sample_table();
        let bytes = marshal(&table);
        let restored = unmarshal(&bytes).expect("well-formed snapshot decodes");

        assert_eq!(restored.len(), table.len());
        for (lid, rec) in &table {
            let other = restored.get(lid).expect("lock id present after round trip");
            assert_eq!(rec.held, other.held);
            assert_eq!(rec.holder, other.holder);
            assert_eq!(rec.revoked, other.revoked);
            assert_eq!(rec.waiters, other.waiters);
            assert_eq!(rec.highest_xid, other.highest_xid);
            assert_eq!(rec.acquire_reply, other.acquire_reply);
            assert_eq!(rec.release_reply, other.release_reply);
        }
    }

    #[test]
    fn marshal_is_deterministic_across_calls() {
        let table = sample_table();
        assert_eq!(marshal(&table), marshal(&table));
    }

    #[test]
    fn empty_table_round_trips() {
        let table: BTreeMap<LockId, LockRecord> = BTreeMap::new();
        let bytes = marshal(&table);
        assert_eq!(bytes, 0u32.to_be_bytes().to_vec());
        let restored = unmarshal(&bytes).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn truncated_input_is_rejected_not_panicking() {
        let table = sample_table();
        let mut bytes = marshal(&table);
        bytes.truncate(bytes.len() - 1);
        let err = unmarshal(&bytes).unwrap_err();
        matches!(err, SnapshotError::Truncated { .. });
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let table = sample_table();
        let mut bytes = marshal(&table);
        bytes.push(0xFF);
        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, SnapshotError::TrailingData { remaining: 1 }));
    }

    #[test]
    fn unknown_reply_code_is_rejected() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 1);
        write_u64(&mut bytes, 7);
        write_bool(&mut bytes, false);
        write_bool(&mut bytes, false);
        write_str(&mut bytes, "");
        write_u32(&mut bytes, 0);
        write_u32(&mut bytes, 0);
        write_u32(&mut bytes, 1);
        write_str(&mut bytes, "A");
        write_i32(&mut bytes, 99);
        write_u32(&mut bytes, 0);

        let err = unmarshal(&bytes).unwrap_err();
        assert!(matches!(err, SnapshotError::UnknownReplyCode { value: 99, .. }));
    }
}
