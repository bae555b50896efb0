//! Byte rope for multipart buffering: a chunk list with amortized-O(1)
//! append, flushed to a contiguous `Bytes` once it reaches a threshold
//! (SPEC_FULL.md §9's "byte rope for multipart buffering"). Grounded on
//! `bytes::BytesMut`'s standard accumulate-then-freeze pattern as used in
//! the teacher's `multipart.rs::complete` (concatenating part ETags before
//! hashing).

use bytes::{Bytes, BytesMut};

/// Accumulates chunks without copying until `take_if_full` (or `take_all`
/// at end-of-stream) is called, which concatenates into one contiguous
/// buffer. Copies happen exactly once per flush, not once per `push`.
#[derive(Default)]
pub struct ByteRope {
    chunks: Vec<Bytes>,
    len: usize,
}

impl ByteRope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Bytes) {
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drains and concatenates the buffered chunks into one `Bytes`,
    /// regardless of threshold. Used both for threshold-triggered part
    /// flushes and for the final partial-part flush at end-of-stream.
    pub fn take_all(&mut self) -> Bytes {
        if self.chunks.len() == 1 && self.chunks[0].len() == self.len {
            self.len = 0;
            return self.chunks.pop().unwrap();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.len = 0;
        out.freeze()
    }

    /// Flushes and returns the buffer if it has reached `threshold`,
    /// otherwise leaves it untouched and returns `None`.
    pub fn take_if_at_least(&mut self, threshold: usize) -> Option<Bytes> {
        if self.len >= threshold {
            Some(self.take_all())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_threshold() {
        let mut rope = ByteRope::new();
        rope.push(Bytes::from_static(b"abc"));
        assert!(rope.take_if_at_least(10).is_none());
        rope.push(Bytes::from_static(b"defghijk"));
        let flushed = rope.take_if_at_least(10).unwrap();
        assert_eq!(flushed.as_ref(), b"abcdefghijk");
        assert!(rope.is_empty());
    }

    #[test]
    fn take_all_concatenates_partial_buffer() {
        let mut rope = ByteRope::new();
        rope.push(Bytes::from_static(b"x"));
        rope.push(Bytes::from_static(b"yz"));
        assert_eq!(rope.take_all().as_ref(), b"xyz");
    }

    #[test]
    fn single_chunk_fast_path_avoids_copy() {
        let mut rope = ByteRope::new();
        let chunk = Bytes::from_static(b"solo");
        rope.push(chunk.clone());
        assert_eq!(rope.take_all(), chunk);
    }
}
