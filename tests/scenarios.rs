//! End-to-end scenarios from SPEC_FULL.md §8 (S1-S6), run against the
//! in-memory `ObjectIo`/`BlockIndexTable` fakes so the full hash → copy →
//! reindex pipeline exercises real worker code without a live store.

use carshift::model::{encode_multihash, sha256_multihash, BlockIndexRow, ObjectRef, RootLink, ShardRef, CAR_CODEC};
use carshift::objectio::InMemoryObjectIo;
use carshift::table::InMemoryBlockIndexTable;
use carshift::worker::{copy, hash, reindex, CopyOptions};
use cid::Cid;

/// Builds a CAR shard with `n` distinct raw-codec blocks, each a few bytes,
/// returning the shard bytes, its content identifier, and the per-block
/// multihashes in file order.
fn build_shard(n: usize) -> (Vec<u8>, Cid, Vec<cid::multihash::Multihash<64>>) {
    let mut shard = Vec::new();
    let mut multihashes = Vec::new();

    for i in 0..n {
        let payload = format!("block payload number {i}").into_bytes();
        let block_cid = Cid::new_v1(0x55, sha256_multihash(&payload));
        let cid_bytes = block_cid.to_bytes();
        let frame_len = (cid_bytes.len() + payload.len()) as u64;
        let mut varint_buf = unsigned_varint::encode::u64_buffer();
        shard.extend_from_slice(unsigned_varint::encode::u64(frame_len, &mut varint_buf));
        shard.extend_from_slice(&cid_bytes);
        shard.extend_from_slice(&payload);
        multihashes.push(*block_cid.hash());
    }

    let shard_cid = Cid::new_v1(CAR_CODEC, sha256_multihash(&shard));
    (shard, shard_cid, multihashes)
}

fn dest_triplet(shard: &str) -> (ObjectRef, ObjectRef, ObjectRef) {
    (
        ObjectRef::new("auto", "carpark-prod-0", format!("{shard}/{shard}.car")),
        ObjectRef::new("auto", "satnav-prod-0", format!("{shard}/{shard}.car.idx")),
        ObjectRef::new("auto", "dudewhere-prod-0", format!("root/{shard}")),
    )
}

/// S1 — small copy: single-PUT path, all three destination keys present.
#[tokio::test]
async fn s1_small_copy_single_put_path() {
    let io = InMemoryObjectIo::new();
    let (bytes, shard_cid, _) = build_shard(5);
    let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
    io.seed(&src_obj, bytes.clone());

    let hashed = hash(&src_obj, &io).await.unwrap();
    assert_eq!(hashed.cid.hash().digest(), shard_cid.hash().digest());

    let src = ShardRef::new(src_obj, shard_cid);
    let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());
    let outcome = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
        .await
        .unwrap();

    assert!(!outcome.already_existed);
    assert!(io.head(&dest).await.is_ok());
    assert!(io.head(&index_dest).await.is_ok());
    assert!(io.head(&link_dest).await.is_ok());
    let stored = io.get_stored(&dest).unwrap();
    assert_eq!(stored.as_ref(), bytes.as_slice());
}

/// S2 — large multipart copy: a small `maxPutSize` forces the multipart
/// path; the reassembled destination object must still match byte-for-byte.
#[tokio::test]
async fn s2_large_shard_forces_multipart_path() {
    let io = InMemoryObjectIo::new();
    let (bytes, shard_cid, _) = build_shard(50);
    let src_obj = ObjectRef::new("us-west-2", "dotstorage-prod-1", "complete/root.car");
    io.seed(&src_obj, bytes.clone());

    let src = ShardRef::new(src_obj, shard_cid);
    let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());
    let opts = CopyOptions { max_put_size: 64 };
    let outcome = copy(&src, &dest, &index_dest, &link_dest, opts, &io).await.unwrap();

    assert!(!outcome.already_existed);
    let stored = io.get_stored(&dest).unwrap();
    assert_eq!(stored.as_ref(), bytes.as_slice());
    assert!(io.head(&index_dest).await.is_ok());
    assert!(io.head(&link_dest).await.is_ok());
}

/// S3 — integrity failure: Copy against an unrelated cid must fail and
/// leave no destination object HEAD-able.
#[tokio::test]
async fn s3_integrity_failure_leaves_no_destination() {
    let io = InMemoryObjectIo::new();
    let (bytes, _real_cid, _) = build_shard(3);
    let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
    io.seed(&src_obj, bytes);

    let unrelated_cid = Cid::new_v1(CAR_CODEC, sha256_multihash(b"not the shard"));
    let src = ShardRef::new(src_obj, unrelated_cid);
    let (dest, index_dest, link_dest) = dest_triplet(&unrelated_cid.to_string());

    let err = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
        .await
        .unwrap_err();
    assert!(matches!(err, carshift::errors::WorkerError::Integrity));
    assert!(io.head(&dest).await.is_err());
}

/// S4 — idempotent copy: running Copy twice issues no additional PUTs on
/// the second call.
#[tokio::test]
async fn s4_idempotent_rerun_issues_no_additional_puts() {
    let io = InMemoryObjectIo::new();
    let (bytes, shard_cid, _) = build_shard(4);
    let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
    io.seed(&src_obj, bytes);
    let src = ShardRef::new(src_obj, shard_cid);
    let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());

    copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
        .await
        .unwrap();
    let puts_after_first = io.put_count();

    let second = copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
        .await
        .unwrap();

    assert!(second.already_existed);
    assert_eq!(io.put_count(), puts_after_first);
}

/// S5 — reindex with side index: every block multihash ends up at the
/// canonical carpath and is gone from the legacy one.
#[tokio::test]
async fn s5_reindex_with_side_index_moves_every_block() {
    let io = InMemoryObjectIo::new();
    let table = InMemoryBlockIndexTable::new();
    let (bytes, shard_cid, multihashes) = build_shard(8);

    let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
    io.seed(&src_obj, bytes.clone());
    let src = ShardRef::new(src_obj.clone(), shard_cid);

    // Produce the side index the same way Copy would, via a throwaway copy.
    let (dest, index_dest, link_dest) = dest_triplet(&shard_cid.to_string());
    copy(&src, &dest, &index_dest, &link_dest, CopyOptions::default(), &io)
        .await
        .unwrap();
    let idx_bytes = io.get_stored(&index_dest).unwrap();
    let idx_obj = ObjectRef {
        key: format!("{}.idx", src_obj.key),
        ..src_obj.clone()
    };
    io.seed(&idx_obj, idx_bytes);

    let legacy_carpath = src_obj.carpath();
    for mh in &multihashes {
        table.seed(BlockIndexRow {
            blockmultihash: encode_multihash(mh),
            carpath: legacy_carpath.clone(),
            offset: 0,
            length: 10,
        });
    }

    let outcome = reindex(&src, &table, &io).await.unwrap();
    assert_eq!(outcome.updated as usize, multihashes.len());

    let canonical_carpath = src.canonical_carpath();
    for mh in &multihashes {
        let legacy_key = carshift::table::RowKey {
            blockmultihash: encode_multihash(mh),
            carpath: legacy_carpath.clone(),
        };
        assert!(table.get(&legacy_key).is_none());

        let canonical_key = carshift::table::RowKey {
            blockmultihash: encode_multihash(mh),
            carpath: canonical_carpath.clone(),
        };
        assert!(table.get(&canonical_key).is_some());
    }
}

/// S6 — reindex isolation: a third carpath sharing the same multihashes
/// must survive reindex untouched.
#[tokio::test]
async fn s6_reindex_isolation_leaves_third_carpath_untouched() {
    let io = InMemoryObjectIo::new();
    let table = InMemoryBlockIndexTable::new();
    let (bytes, shard_cid, multihashes) = build_shard(6);

    let src_obj = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
    io.seed(&src_obj, bytes);
    let src = ShardRef::new(src_obj.clone(), shard_cid);
    let root = RootLink::normalize(shard_cid);

    let legacy_carpath = src_obj.carpath();
    let third_carpath = format!("{}/raw/u/{}/{}.car", src_obj.region, src_obj.bucket, root);

    for mh in &multihashes {
        table.seed(BlockIndexRow {
            blockmultihash: encode_multihash(mh),
            carpath: legacy_carpath.clone(),
            offset: 0,
            length: 10,
        });
        table.seed(BlockIndexRow {
            blockmultihash: encode_multihash(mh),
            carpath: third_carpath.clone(),
            offset: 0,
            length: 10,
        });
    }

    reindex(&src, &table, &io).await.unwrap();

    for mh in &multihashes {
        let third_key = carshift::table::RowKey {
            blockmultihash: encode_multihash(mh),
            carpath: third_carpath.clone(),
        };
        let row = table.get(&third_key);
        assert_eq!(
            row,
            Some(BlockIndexRow {
                blockmultihash: encode_multihash(mh),
                carpath: third_carpath.clone(),
                offset: 0,
                length: 10,
            })
        );
    }
}
