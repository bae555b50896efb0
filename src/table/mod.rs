//! Block Index Table: the wide-row key-value store mapping
//! `(blockmultihash, carpath)` to `(offset, length)`. No DynamoDB usage
//! appears anywhere in the retrieved pack; `aws-sdk-dynamodb` is chosen by
//! ecosystem proximity to the teacher's `aws-sdk-s3`/`aws-credential-types`
//! stack (shared `aws-config`/`aws-smithy` plumbing), not direct pack
//! grounding — see DESIGN.md. The trait's batch get/put/delete-with-
//! unprocessed-subset shape is grounded on `storage/s3.rs`'s
//! `list_objects_with_prefix` continuation-token loop, applied to
//! DynamoDB's `UnprocessedKeys`/`UnprocessedItems`.

mod dynamodb;
mod fake;

pub use dynamodb::DynamoDbBlockIndexTable;
pub use fake::InMemoryBlockIndexTable;

use crate::model::BlockIndexRow;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("transient table error: {0}")]
    Transient(String),

    #[error("table error: {0}")]
    Upstream(String),
}

/// A fully-specified row key: `(blockmultihash, carpath)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub blockmultihash: String,
    pub carpath: String,
}

#[async_trait]
pub trait BlockIndexTable: Send + Sync {
    /// Point-reads `keys`. Keys with no matching row are silently omitted
    /// from the result, per SPEC_FULL.md §4.3 step 2 ("a multihash may not
    /// have a row at the legacy carpath").
    async fn batch_get(&self, keys: &[RowKey]) -> Result<Vec<BlockIndexRow>, TableError>;

    /// Writes `rows`, returning the subset the store could not accept
    /// ("UnprocessedItems"-style). An empty return means everything was
    /// written; callers retry only with the returned subset.
    async fn batch_put(&self, rows: &[BlockIndexRow]) -> Result<Vec<BlockIndexRow>, TableError>;

    /// Deletes `keys`, returning the subset the store could not process.
    async fn batch_delete(&self, keys: &[RowKey]) -> Result<Vec<RowKey>, TableError>;
}

/// Retries a batch put against only the unprocessed subset, up to
/// `max_retries` additional attempts, per SPEC_FULL.md §4.3 step 3a.
/// Remaining unprocessed rows after retries are a fatal error for the
/// batch.
pub async fn put_with_retry(
    table: &dyn BlockIndexTable,
    rows: Vec<BlockIndexRow>,
    max_retries: u32,
) -> Result<(), TableError> {
    let mut remaining = rows;
    for _ in 0..=max_retries {
        if remaining.is_empty() {
            return Ok(());
        }
        remaining = table.batch_put(&remaining).await?;
    }
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(TableError::Upstream(format!(
            "{} rows remained unprocessed after retries",
            remaining.len()
        )))
    }
}

/// Retries a batch delete against only the unprocessed subset, mirroring
/// `put_with_retry`.
pub async fn delete_with_retry(
    table: &dyn BlockIndexTable,
    keys: Vec<RowKey>,
    max_retries: u32,
) -> Result<(), TableError> {
    let mut remaining = keys;
    for _ in 0..=max_retries {
        if remaining.is_empty() {
            return Ok(());
        }
        remaining = table.batch_delete(&remaining).await?;
    }
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(TableError::Upstream(format!(
            "{} keys remained unprocessed after retries",
            remaining.len()
        )))
    }
}
