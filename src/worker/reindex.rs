//! Shard Reindexer: rewrite every block-table row for this shard's
//! multihashes, switching their legacy location to the canonical one, never
//! touching rows that belong to other shards. Batch sizes and retry
//! discipline follow SPEC_FULL.md §4.3 directly.

use crate::car::CarBlockReader;
use crate::errors::WorkerError;
use crate::model::{encode_multihash, BlockIndexRow, ShardRef};
use crate::objectio::{ObjectIo, ObjectIoError};
use crate::sindex::SortedIndexReader;
use crate::table::{delete_with_retry, put_with_retry, BlockIndexTable, RowKey};
use cid::multihash::Multihash;
use futures::TryStreamExt;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::io::StreamReader;

/// Multihashes are fetched from the table in batches of this size
/// (SPEC_FULL.md §4.3 step 2).
const FETCH_BATCH_SIZE: usize = 100;

/// Rows are rewritten in batches of this size (SPEC_FULL.md §4.3 step 3).
const REWRITE_BATCH_SIZE: usize = 25;

/// Concurrency across rewrite batches (SPEC_FULL.md §4.3 step 3).
const REWRITE_CONCURRENCY: usize = 5;

/// Retries attempted per batch against only the unprocessed subset
/// (SPEC_FULL.md §4.3 step 3a).
const MAX_BATCH_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexOutcome {
    pub updated: u64,
}

/// Repoints every block in `src`'s shard from its legacy `(region, bucket,
/// key)` carpath to the canonical `auto/carpark-prod-0/{cid}/{cid}.car`
/// carpath in `table`. Fetch batches run sequentially (§4.3 step 2 is
/// unordered across batches but there is no benefit to parallelizing a
/// point-lookup fan-in); rewrite batches run with concurrency
/// `REWRITE_CONCURRENCY`, per §4.3 step 3 and §5.
pub async fn reindex(
    src: &ShardRef,
    table: &dyn BlockIndexTable,
    io: &dyn ObjectIo,
) -> Result<ReindexOutcome, WorkerError> {
    let multihashes = enumerate_multihashes(src, io).await?;
    let legacy_carpath = src.object.carpath();
    let canonical_carpath = src.canonical_carpath();

    let mut legacy_rows = Vec::new();
    for fetch_batch in multihashes.chunks(FETCH_BATCH_SIZE) {
        let keys: Vec<RowKey> = fetch_batch
            .iter()
            .map(|mh| RowKey {
                blockmultihash: encode_multihash(mh),
                carpath: legacy_carpath.clone(),
            })
            .collect();
        legacy_rows.extend(table.batch_get(&keys).await?);
    }

    let rewrite_batches: Vec<&[BlockIndexRow]> = legacy_rows.chunks(REWRITE_BATCH_SIZE).collect();

    let mut updated = 0u64;
    for group in rewrite_batches.chunks(REWRITE_CONCURRENCY) {
        let results = futures::future::join_all(
            group
                .iter()
                .map(|batch| rewrite_one_batch(table, batch, &canonical_carpath)),
        )
        .await;
        for (batch, result) in group.iter().zip(results) {
            result?;
            updated += batch.len() as u64;
        }
    }

    Ok(ReindexOutcome { updated })
}

async fn rewrite_one_batch(
    table: &dyn BlockIndexTable,
    legacy_rows: &[BlockIndexRow],
    canonical_carpath: &str,
) -> Result<(), WorkerError> {
    let new_rows: Vec<BlockIndexRow> = legacy_rows
        .iter()
        .map(|row| BlockIndexRow {
            blockmultihash: row.blockmultihash.clone(),
            carpath: canonical_carpath.to_string(),
            offset: row.offset,
            length: row.length,
        })
        .collect();

    put_with_retry(table, new_rows, MAX_BATCH_RETRIES).await?;

    let legacy_keys: Vec<RowKey> = legacy_rows
        .iter()
        .map(|row| RowKey {
            blockmultihash: row.blockmultihash.clone(),
            carpath: row.carpath.clone(),
        })
        .collect();
    delete_with_retry(table, legacy_keys, MAX_BATCH_RETRIES).await?;

    Ok(())
}

/// Enumerates the shard's block multihashes: prefer the precomputed sorted
/// side index at `{key}.idx`, falling back to parsing the shard itself if
/// that object is absent.
async fn enumerate_multihashes(
    src: &ShardRef,
    io: &dyn ObjectIo,
) -> Result<Vec<Multihash<64>>, WorkerError> {
    let idx_ref = crate::model::ObjectRef {
        key: format!("{}.idx", src.object.key),
        ..src.object.clone()
    };

    match io.get(&idx_ref).await {
        Ok(output) => {
            let bytes = output
                .body
                .try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await
                .map_err(WorkerError::from)?;
            let entries = SortedIndexReader::new(bytes.into())
                .entries()
                .map_err(|e| WorkerError::upstream(e.to_string()))?;
            Ok(entries.into_iter().map(|e| e.multihash).collect())
        }
        Err(ObjectIoError::NotFound(_)) => {
            let output = io.get(&src.object).await?;
            let reader = StreamReader::new(
                output
                    .body
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
            )
            .compat();
            let mut car_reader = CarBlockReader::new(reader);
            let mut out = Vec::new();
            while let Some(block) = car_reader.next_block().await.map_err(WorkerError::from)? {
                out.push(*block.cid.hash());
            }
            Ok(out)
        }
        Err(e) => Err(e.into()),
    }
}
