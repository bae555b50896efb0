//! Sorted side-index format: a binary sequence of `(multihash, offset)`
//! pairs, stored sorted by raw multihash bytes. Streaming-in (`add`, in any
//! order, then `close`), sorted-out (`SortedIndexReader` yields entries in
//! ascending multihash order).
//!
//! No single pack file implements this exact format; the accumulate-then-
//! sort shape follows `examples/other_examples/570f0657_jsam-shardpack__
//! src-index.rs.rs`'s `NativeIndex`/`IndexEntry` accumulation pattern.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cid::multihash::Multihash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SortedIndexError {
    #[error("truncated sorted index record")]
    Truncated,
    #[error("malformed multihash in sorted index: {0}")]
    Multihash(#[from] cid::multihash::Error),
}

/// One entry of a sorted index: a block's multihash and its byte offset
/// within the shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedIndexEntry {
    pub multihash: Multihash<64>,
    pub offset: u64,
}

/// Accumulates `(multihash, offset)` pairs in whatever order they arrive
/// and emits them sorted by raw multihash bytes on `close`.
///
/// Record layout: `varint(multihash_len) || multihash_bytes || u64le(offset)`,
/// concatenated in ascending multihash order.
#[derive(Default)]
pub struct SortedIndexWriter {
    entries: Vec<SortedIndexEntry>,
}

impl SortedIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, multihash: Multihash<64>, offset: u64) {
        self.entries.push(SortedIndexEntry { multihash, offset });
    }

    /// Sorts accumulated entries by raw multihash bytes and serializes them.
    pub fn close(mut self) -> Bytes {
        self.entries
            .sort_by(|a, b| a.multihash.to_bytes().cmp(&b.multihash.to_bytes()));

        let mut buf = BytesMut::new();
        for entry in &self.entries {
            let mh_bytes = entry.multihash.to_bytes();
            let mut varint_buf = unsigned_varint::encode::usize_buffer();
            let varint = unsigned_varint::encode::usize(mh_bytes.len(), &mut varint_buf);
            buf.put_slice(varint);
            buf.put_slice(&mh_bytes);
            buf.put_u64_le(entry.offset);
        }
        buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads a `SortedIndexWriter::close()` payload back out as the sequence of
/// entries it was built from, in ascending multihash order.
pub struct SortedIndexReader {
    buf: Bytes,
}

impl SortedIndexReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Parses the whole buffer eagerly. The side index is expected to be
    /// small relative to the shard it describes (one entry per block), so
    /// this is not streamed further.
    pub fn entries(mut self) -> Result<Vec<SortedIndexEntry>, SortedIndexError> {
        let mut out = Vec::new();
        while self.buf.has_remaining() {
            let mh_len = read_varint_usize(&mut self.buf)?;
            if self.buf.remaining() < mh_len + 8 {
                return Err(SortedIndexError::Truncated);
            }
            let mh_bytes = self.buf.copy_to_bytes(mh_len);
            let multihash = Multihash::from_bytes(&mh_bytes)?;
            let offset = self.buf.get_u64_le();
            out.push(SortedIndexEntry { multihash, offset });
        }
        Ok(out)
    }
}

fn read_varint_usize(buf: &mut Bytes) -> Result<usize, SortedIndexError> {
    // unsigned_varint::decode::usize wants a slice it can trim; hand it the
    // whole remaining buffer and advance by what it consumed.
    let (value, rest) =
        unsigned_varint::decode::usize(buf.as_ref()).map_err(|_| SortedIndexError::Truncated)?;
    let consumed = buf.remaining() - rest.len();
    buf.advance(consumed);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use multihash_codetable::{Code, MultihashDigest};

    #[test]
    fn round_trips_sorted_by_multihash() {
        let mut writer = SortedIndexWriter::new();
        let mh_a = Code::Sha2_256.digest(b"a");
        let mh_b = Code::Sha2_256.digest(b"bbbbb");
        writer.add(mh_b, 100);
        writer.add(mh_a, 0);

        let bytes = writer.close();
        let entries = SortedIndexReader::new(bytes).entries().unwrap();

        assert_eq!(entries.len(), 2);
        let mut sorted_bytes: Vec<_> = [mh_a, mh_b].iter().map(|m| m.to_bytes()).collect();
        sorted_bytes.sort();
        assert_eq!(entries[0].multihash.to_bytes(), sorted_bytes[0]);
        assert_eq!(entries[1].multihash.to_bytes(), sorted_bytes[1]);
    }

    #[test]
    fn empty_index_round_trips() {
        let writer = SortedIndexWriter::new();
        let bytes = writer.close();
        assert!(bytes.is_empty());
        let entries = SortedIndexReader::new(bytes).entries().unwrap();
        assert!(entries.is_empty());
    }
}
