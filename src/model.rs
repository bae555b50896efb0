//! Shared value types for shard locations, content identifiers, and block
//! framing. Nothing here does I/O; see `objectio`, `car`, and `sindex` for
//! that.

use cid::multihash::Multihash;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::fmt;

/// CAR codec, per the multicodec table. Every `ShardRef::cid` carries this
/// codec; it is not the codec of the blocks *inside* the shard.
pub const CAR_CODEC: u64 = 0x0202;

/// sha256 multihash function code.
pub const SHA2_256_CODE: u64 = 0x12;

/// Static AWS-style credentials carried alongside an `ObjectRef` so a source
/// and a destination store can use different identities in one operation.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .finish()
    }
}

/// A locator for a stored object. Value type, freely copied (the inner
/// `String`s aside — cloning an `ObjectRef` is always cheap relative to the
/// I/O it describes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub endpoint: Option<String>,
    pub credentials: Option<StaticCredentials>,
}

impl ObjectRef {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
            endpoint: None,
            credentials: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(mut self, creds: StaticCredentials) -> Self {
        self.credentials = Some(creds);
        self
    }

    /// The legacy carpath form used as a block-index table sort key:
    /// `"{region}/{bucket}/{key}"`.
    pub fn carpath(&self) -> String {
        format!("{}/{}/{}", self.region, self.bucket, self.key)
    }
}

/// An `ObjectRef` extended with the shard's own content identifier. The
/// invariant `cid.multihash == sha256(bytes(object at key))` is established
/// by `worker::hash` and checked again during `worker::copy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRef {
    pub object: ObjectRef,
    pub cid: Cid,
}

impl ShardRef {
    pub fn new(object: ObjectRef, cid: Cid) -> Self {
        Self { object, cid }
    }

    /// Canonical post-migration carpath: `"auto/carpark-prod-0/{cid}/{cid}.car"`.
    /// The `"auto/carpark-prod-0"` prefix is an opaque literal, not a parsed
    /// region (see SPEC_FULL.md §9).
    pub fn canonical_carpath(&self) -> String {
        format!("auto/carpark-prod-0/{cid}/{cid}.car", cid = self.cid)
    }

    pub fn shard_name(&self) -> String {
        self.cid.to_string()
    }
}

/// An untyped content identifier naming the logical DAG root whose
/// serialization is sharded. Any codec; always normalized to CIDv1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLink(pub Cid);

impl RootLink {
    /// Normalizes `cid` to version 1, preserving codec and multihash.
    pub fn normalize(cid: Cid) -> Self {
        if cid.version() == cid::Version::V1 {
            RootLink(cid)
        } else {
            RootLink(Cid::new_v1(cid.codec(), *cid.hash()))
        }
    }
}

impl fmt::Display for RootLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One CAR frame as discovered by the CAR reader: `offset` is the byte
/// position of the frame's varint-length prefix within the shard; `length`
/// covers the whole frame (varint + cid bytes + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub offset: u64,
    pub length: u64,
}

/// The payload-only view of a `Block`, excluding the frame header. This is
/// what `BlockIndexRow::offset`/`length` record after migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBody {
    pub offset: u64,
    pub length: u64,
}

impl Block {
    /// Derives the block-body offset/length by subtracting the varint and
    /// cid-bytes header from the frame's own offset/length.
    pub fn body(&self) -> BlockBody {
        let cid_len = self.cid.to_bytes().len() as u64;
        let varint_len = unsigned_varint::encode::u64_buffer();
        let mut varint_buf = varint_len;
        let header_len = unsigned_varint::encode::u64(self.length, &mut varint_buf).len() as u64 + cid_len;
        BlockBody {
            offset: self.offset + header_len,
            length: self.length.saturating_sub(header_len),
        }
    }
}

/// One row of the block-index wide table. Primary key is
/// `(blockmultihash, carpath)`; rows are never mutated in place — reindex
/// inserts a new row then deletes the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexRow {
    /// base58btc encoding of the multihash's raw bytes.
    pub blockmultihash: String,
    pub carpath: String,
    pub offset: u64,
    pub length: u64,
}

/// Encodes a multihash's bytes as base58btc, matching `blockmultihash`'s
/// on-disk representation in the block-index table.
pub fn encode_multihash(mh: &Multihash<64>) -> String {
    base58::ToBase58::to_base58(mh.to_bytes().as_slice())
}

/// Computes a sha256 multihash over `digest`, matching the shard hasher's
/// and the CAR reader's convention (`Code::Sha2_256`).
pub fn sha256_multihash(digest: &[u8]) -> Multihash<64> {
    Code::Sha2_256.digest(digest)
}
