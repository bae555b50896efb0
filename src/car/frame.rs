use crate::model::Block;
use cid::multihash::Multihash;
use cid::{Cid, Version};
use futures::io::{AsyncRead, AsyncReadExt};
use unsigned_varint::io::ReadError;

/// Bytes skipped between frames are read in chunks of this size rather than
/// one allocation sized to the payload, so a single oversized block can't
/// force an unbounded buffer.
const SKIP_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CarError {
    #[error("io error reading CAR stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed CAR frame")]
    Malformed,
}

impl From<ReadError> for CarError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Io(io) => CarError::Io(io),
            _ => CarError::Malformed,
        }
    }
}

/// Streams `Block{cid, offset, length}` tuples out of a CAR v1 byte stream
/// in file order. Single-pass, forward-only: does not buffer the shard and
/// does not retain block payloads, only their framing.
pub struct CarBlockReader<R> {
    reader: R,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> CarBlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Returns the next block's framing, or `None` once the stream is
    /// exhausted. Not restartable once `None` has been returned.
    pub async fn next_block(&mut self) -> Result<Option<Block>, CarError> {
        if self.done {
            return Ok(None);
        }

        let frame_len = match unsigned_varint::aio::read_u64(&mut self.reader).await {
            Ok(v) => v,
            Err(ReadError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let varint_len = varint_byte_len(frame_len) as u64;
        let start_offset = self.offset;
        self.offset += varint_len;

        let (cid, cid_len) = read_cid(&mut self.reader).await?;
        self.offset += cid_len as u64;

        let payload_len = frame_len
            .checked_sub(cid_len as u64)
            .ok_or(CarError::Malformed)?;
        skip_exact(&mut self.reader, payload_len).await?;
        self.offset += payload_len;

        Ok(Some(Block {
            cid,
            offset: start_offset,
            length: varint_len + frame_len,
        }))
    }
}

async fn read_cid<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Cid, usize), CarError> {
    let version = unsigned_varint::aio::read_u64(reader).await?;
    let codec = unsigned_varint::aio::read_u64(reader).await?;

    // CIDv0 has the fixed `0x12 0x20` prefix (sha2-256, 32-byte digest),
    // which reads identically to a version/codec varint pair.
    if (version, codec) == (0x12, 0x20) {
        let mut digest = [0u8; 32];
        reader.read_exact(&mut digest).await?;
        let mh = Multihash::wrap(0x12, &digest).map_err(|_| CarError::Malformed)?;
        let cid = Cid::new_v0(mh).map_err(|_| CarError::Malformed)?;
        let len = cid.to_bytes().len();
        return Ok((cid, len));
    }

    if Version::try_from(version).map_err(|_| CarError::Malformed)? != Version::V1 {
        return Err(CarError::Malformed);
    }
    let mh_code = unsigned_varint::aio::read_u64(reader).await?;
    let size = unsigned_varint::aio::read_u64(reader).await?;
    let mut digest = vec![0u8; size as usize];
    reader.read_exact(&mut digest).await?;
    let mh = Multihash::wrap(mh_code, &digest).map_err(|_| CarError::Malformed)?;
    let cid = Cid::new_v1(codec, mh);
    let len = cid.to_bytes().len();
    Ok((cid, len))
}

async fn skip_exact<R: AsyncRead + Unpin>(reader: &mut R, mut remaining: u64) -> Result<(), CarError> {
    let mut buf = [0u8; SKIP_CHUNK];
    while remaining > 0 {
        let take = remaining.min(SKIP_CHUNK as u64) as usize;
        reader.read_exact(&mut buf[..take]).await?;
        remaining -= take as u64;
    }
    Ok(())
}

fn varint_byte_len(v: u64) -> usize {
    let mut buf = unsigned_varint::encode::u64_buffer();
    unsigned_varint::encode::u64(v, &mut buf).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sha256_multihash;
    use futures::io::Cursor;

    fn encode_frame(cid: &Cid, payload: &[u8]) -> Vec<u8> {
        let cid_bytes = cid.to_bytes();
        let frame_len = (cid_bytes.len() + payload.len()) as u64;
        let mut out = Vec::new();
        let mut varint_buf = unsigned_varint::encode::u64_buffer();
        out.extend_from_slice(unsigned_varint::encode::u64(frame_len, &mut varint_buf));
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn reads_blocks_in_order() {
        let payload_a = b"hello".to_vec();
        let payload_b = b"world, a bit longer this time".to_vec();
        let cid_a = Cid::new_v1(0x55, sha256_multihash(&payload_a));
        let cid_b = Cid::new_v1(0x55, sha256_multihash(&payload_b));

        let mut bytes = Vec::new();
        bytes.extend(encode_frame(&cid_a, &payload_a));
        bytes.extend(encode_frame(&cid_b, &payload_b));

        let mut reader = CarBlockReader::new(Cursor::new(bytes));
        let first = reader.next_block().await.unwrap().unwrap();
        assert_eq!(first.cid, cid_a);
        assert_eq!(first.offset, 0);

        let second = reader.next_block().await.unwrap().unwrap();
        assert_eq!(second.cid, cid_b);
        assert!(second.offset > first.offset);

        assert!(reader.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_stream_yields_no_blocks() {
        let mut reader = CarBlockReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.next_block().await.unwrap().is_none());
    }
}
