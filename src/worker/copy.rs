//! Shard Copier: idempotently copy one shard to its destination, producing
//! a sorted block index and a root-link marker, with end-to-end integrity
//! checking. The tee/rope/hasher join here is grounded on `examples/
//! other_examples/b2de9952_beyondessential-bestool__src-aws-s3.rs.rs`'s
//! `multipart_upload` (serial part upload, `AtomicU32`-style part
//! numbering, abort-on-error) and `examples/other_examples/41eef903_
//! Hakuyume-s3-mpu-rs__src-lib.rs.rs`'s create/upload/complete shape.

use crate::car::CarBlockReader;
use crate::errors::WorkerError;
use crate::model::{ObjectRef, ShardRef};
use crate::objectio::{ObjectIo, ObjectIoError, UploadedPart};
use crate::rope::ByteRope;
use crate::sindex::SortedIndexWriter;
use crate::tee::{ByteTee, TeeReceiver};
use base64::Engine;
use bytes::Bytes;
use cid::Cid;
use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::io::StreamReader;

/// Multipart is used once the shard is at least this large (default 5 GiB,
/// SPEC_FULL.md §4.2.1).
pub const DEFAULT_MAX_PUT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Target size of a buffered multipart part before it is flushed and
/// uploaded (SPEC_FULL.md §4.2.1).
pub const TARGET_PART_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    pub max_put_size: u64,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            max_put_size: DEFAULT_MAX_PUT_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// `true` if the destination already existed and no work was done
    /// (the idempotence pre-step hit).
    pub already_existed: bool,
}

/// Copies `src` to `dest`, writing a sorted side index to `index_dest` and
/// a zero-byte root-link marker to `link_dest`. All three must succeed.
pub async fn copy(
    src: &ShardRef,
    dest: &ObjectRef,
    index_dest: &ObjectRef,
    link_dest: &ObjectRef,
    opts: CopyOptions,
    io: &dyn ObjectIo,
) -> Result<CopyOutcome, WorkerError> {
    match io.head(dest).await {
        Ok(_) => return Ok(CopyOutcome { already_existed: true }),
        Err(ObjectIoError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let get = io.get(&src.object).await?;
    let content_length = get.content_length;
    if content_length == 0 {
        return Err(WorkerError::not_found(format!(
            "{} has zero content length",
            src.object.key
        )));
    }

    let (tee, car_rx, index_rx) = ByteTee::new();
    let body_stream = get
        .body
        .map_err(|e| crate::tee::TeeError(e.to_string()));
    let drive_handle = tokio::spawn(tee.drive(body_stream));

    let dest = dest.clone();
    let index_dest = index_dest.clone();
    let link_dest = link_dest.clone();
    let shard_cid = src.cid;

    let car_fut = write_car_sink(dest, shard_cid, content_length, opts.max_put_size, car_rx, io);
    let index_fut = write_index_sink(index_dest, index_rx, io);
    let link_fut = async {
        io.put(&link_dest, Bytes::new(), 0, None)
            .await
            .map_err(WorkerError::from)
    };

    let (car_res, index_res, link_res) = tokio::join!(car_fut, index_fut, link_fut);

    drive_handle
        .await
        .map_err(|e| WorkerError::upstream(format!("tee pump task panicked: {e}")))?;

    car_res?;
    index_res?;
    link_res?;

    Ok(CopyOutcome { already_existed: false })
}

async fn write_car_sink(
    dest: ObjectRef,
    expected_cid: Cid,
    content_length: u64,
    max_put_size: u64,
    mut rx: TeeReceiver,
    io: &dyn ObjectIo,
) -> Result<(), WorkerError> {
    if content_length < max_put_size {
        let mut hasher = Sha256::new();
        let mut rope = ByteRope::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(|e| WorkerError::upstream(e.to_string()))?;
            hasher.update(&chunk);
            rope.push(chunk);
        }
        verify_digest(hasher, &expected_cid)?;

        let body = rope.take_all();
        let checksum = base64_digest(expected_cid.hash().digest());
        io.put(&dest, body.clone(), body.len() as u64, Some(checksum))
            .await?;
        Ok(())
    } else {
        multipart_copy(dest, expected_cid, rx, io).await
    }
}

async fn multipart_copy(
    dest: ObjectRef,
    expected_cid: Cid,
    mut rx: TeeReceiver,
    io: &dyn ObjectIo,
) -> Result<(), WorkerError> {
    let upload_id = io.create_multipart_upload(&dest).await?;

    let result = multipart_copy_inner(&dest, &upload_id, expected_cid, &mut rx, io).await;

    match result {
        Ok(parts) => {
            io.complete_multipart_upload(&dest, &upload_id, parts).await?;
            Ok(())
        }
        Err(e) => {
            let _ = io.abort_multipart_upload(&dest, &upload_id).await;
            Err(e)
        }
    }
}

async fn multipart_copy_inner(
    dest: &ObjectRef,
    upload_id: &str,
    expected_cid: Cid,
    rx: &mut TeeReceiver,
    io: &dyn ObjectIo,
) -> Result<Vec<UploadedPart>, WorkerError> {
    let mut hasher = Sha256::new();
    let mut rope = ByteRope::new();
    let mut parts = Vec::new();
    let mut part_number: i32 = 1;

    while let Some(chunk) = rx.recv().await {
        let chunk = chunk.map_err(|e| WorkerError::upstream(e.to_string()))?;
        hasher.update(&chunk);
        rope.push(chunk);

        if let Some(body) = rope.take_if_at_least(TARGET_PART_SIZE) {
            let part = upload_part(dest, upload_id, part_number, body, io).await?;
            parts.push(part);
            part_number += 1;
        }
    }

    if !rope.is_empty() {
        let body = rope.take_all();
        let part = upload_part(dest, upload_id, part_number, body, io).await?;
        parts.push(part);
    }

    if parts.is_empty() {
        return Err(WorkerError::upstream("no chunks read from source stream"));
    }

    verify_digest(hasher, &expected_cid)?;
    Ok(parts)
}

async fn upload_part(
    dest: &ObjectRef,
    upload_id: &str,
    part_number: i32,
    body: Bytes,
    io: &dyn ObjectIo,
) -> Result<UploadedPart, WorkerError> {
    let checksum = base64_digest(&Sha256::digest(&body));
    let len = body.len() as u64;
    io.upload_part(dest, upload_id, part_number, body, len, checksum)
        .await
        .map_err(WorkerError::from)
}

async fn write_index_sink(
    index_dest: ObjectRef,
    rx: TeeReceiver,
    io: &dyn ObjectIo,
) -> Result<(), WorkerError> {
    let reader = StreamReader::new(rx).compat();
    let mut car_reader = CarBlockReader::new(reader);
    let mut writer = SortedIndexWriter::new();

    while let Some(block) = car_reader.next_block().await.map_err(WorkerError::from)? {
        writer.add(*block.cid.hash(), block.offset);
    }

    let bytes = writer.close();
    let len = bytes.len() as u64;
    io.put(&index_dest, bytes, len, None).await?;
    Ok(())
}

fn verify_digest(hasher: Sha256, expected_cid: &Cid) -> Result<(), WorkerError> {
    let digest = hasher.finalize();
    if digest.as_slice() == expected_cid.hash().digest() {
        Ok(())
    } else {
        Err(WorkerError::Integrity)
    }
}

fn base64_digest(digest: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{sha256_multihash, CAR_CODEC};
    use crate::objectio::InMemoryObjectIo;

    fn dest_triplet(shard: &str) -> (ObjectRef, ObjectRef, ObjectRef) {
        (
            ObjectRef::new("auto", "carpark", format!("{shard}/{shard}.car")),
            ObjectRef::new("auto", "satnav", format!("{shard}/{shard}.car.idx")),
            ObjectRef::new("auto", "dudewhere", format!("root/{shard}")),
        )
    }

    fn make_shard_bytes() -> (Vec<u8>, Cid) {
        let payload = b"a small block".to_vec();
        let block_cid = Cid::new_v1(0x55, sha256_multihash(&payload));
        let cid_bytes = block_cid.to_bytes();
        let frame_len = (cid_bytes.len() + payload.len()) as u64;
        let mut shard = Vec::new();
        let mut varint_buf = unsigned_varint::encode::u64_buffer();
        shard.extend_from_slice(unsigned_varint::encode::u64(frame_len, &mut varint_buf));
        shard.extend_from_slice(&cid_bytes);
        shard.extend_from_slice(&payload);
        let shard_cid = Cid::new_v1(CAR_CODEC, sha256_multihash(&shard));
        (shard, shard_cid)
    }

    #[tokio::test]
    async fn small_copy_writes_all_three_destinations() {
        let io = InMemoryObjectIo::new();
        let (bytes, shard_cid) = make_shard_bytes();
        let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
        io.seed(&src_obj, bytes);
        let src = ShardRef::new(src_obj, shard_cid);

        let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());
        let outcome = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
            .await
            .unwrap();

        assert!(!outcome.already_existed);
        assert!(io.head(&dest).await.is_ok());
        assert!(io.head(&index_dest).await.is_ok());
        assert!(io.head(&link_dest).await.is_ok());
    }

    #[tokio::test]
    async fn idempotent_second_call_skips_puts() {
        let io = InMemoryObjectIo::new();
        let (bytes, shard_cid) = make_shard_bytes();
        let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
        io.seed(&src_obj, bytes);
        let src = ShardRef::new(src_obj, shard_cid);
        let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());

        copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
            .await
            .unwrap();
        let puts_after_first = io.put_count();

        let outcome = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
            .await
            .unwrap();

        assert!(outcome.already_existed);
        assert_eq!(io.put_count(), puts_after_first);
    }

    #[tokio::test]
    async fn large_shard_takes_multipart_path() {
        let io = InMemoryObjectIo::new();
        let (bytes, shard_cid) = make_shard_bytes();
        let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
        io.seed(&src_obj, bytes.clone());
        let src = ShardRef::new(src_obj, shard_cid);
        let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());

        let opts = CopyOptions { max_put_size: 1 };
        let outcome = copy(&src, &dest, &index_dest, &link_dest, opts, &io)
            .await
            .unwrap();

        assert!(!outcome.already_existed);
        let stored = io.get_stored(&dest).unwrap();
        assert_eq!(stored.as_ref(), bytes.as_slice());
    }

    #[tokio::test]
    async fn integrity_mismatch_leaves_no_destination_object() {
        let io = InMemoryObjectIo::new();
        let (bytes, _real_cid) = make_shard_bytes();
        let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
        io.seed(&src_obj, bytes);

        let unrelated_cid = Cid::new_v1(CAR_CODEC, sha256_multihash(b"not the shard"));
        let src = ShardRef::new(src_obj, unrelated_cid);
        let (dest, index_dest, link_dest) = dest_triplet(&unrelated_cid.to_string());

        let err = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Integrity));
        assert!(io.head(&dest).await.is_err());
    }

    #[tokio::test]
    async fn zero_length_source_is_not_found() {
        let io = InMemoryObjectIo::new();
        let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/empty.car");
        io.seed(&src_obj, Vec::new());
        let empty_cid = Cid::new_v1(CAR_CODEC, sha256_multihash(b""));
        let src = ShardRef::new(src_obj, empty_cid);
        let (dest, index_dest, link_dest) = dest_triplet(&empty_cid.to_string());

        let err = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotFound(_)));
        assert!(io.head(&dest).await.is_err());
    }
}
