use super::{BlockIndexTable, RowKey, TableError};
use crate::model::BlockIndexRow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

fn key_of(row: &BlockIndexRow) -> RowKey {
    RowKey {
        blockmultihash: row.blockmultihash.clone(),
        carpath: row.carpath.clone(),
    }
}

/// In-memory `BlockIndexTable` for the reindex scenario tests (SPEC_FULL.md
/// §8, S5/S6), mirroring the teacher's in-memory `MultipartStore` test
/// approach in `src/multipart.rs`.
#[derive(Default)]
pub struct InMemoryBlockIndexTable {
    rows: Mutex<HashMap<RowKey, BlockIndexRow>>,
}

impl InMemoryBlockIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, row: BlockIndexRow) {
        self.rows.lock().unwrap().insert(key_of(&row), row);
    }

    pub fn get(&self, key: &RowKey) -> Option<BlockIndexRow> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl BlockIndexTable for InMemoryBlockIndexTable {
    async fn batch_get(&self, keys: &[RowKey]) -> Result<Vec<BlockIndexRow>, TableError> {
        let rows = self.rows.lock().unwrap();
        Ok(keys.iter().filter_map(|k| rows.get(k).cloned()).collect())
    }

    async fn batch_put(&self, rows: &[BlockIndexRow]) -> Result<Vec<BlockIndexRow>, TableError> {
        let mut table = self.rows.lock().unwrap();
        for row in rows {
            table.insert(key_of(row), row.clone());
        }
        Ok(Vec::new())
    }

    async fn batch_delete(&self, keys: &[RowKey]) -> Result<Vec<RowKey>, TableError> {
        let mut table = self.rows.lock().unwrap();
        for key in keys {
            table.remove(key);
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_then_delete() {
        let table = InMemoryBlockIndexTable::new();
        let row = BlockIndexRow {
            blockmultihash: "zQm1".to_string(),
            carpath: "us-east-2/b/k.car".to_string(),
            offset: 0,
            length: 10,
        };
        table.batch_put(&[row.clone()]).await.unwrap();

        let key = key_of(&row);
        let fetched = table.batch_get(&[key.clone()]).await.unwrap();
        assert_eq!(fetched, vec![row]);

        table.batch_delete(&[key.clone()]).await.unwrap();
        assert!(table.batch_get(&[key]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_keys_are_silently_dropped() {
        let table = InMemoryBlockIndexTable::new();
        let key = RowKey {
            blockmultihash: "zQmAbsent".to_string(),
            carpath: "us-east-2/b/missing.car".to_string(),
        };
        assert!(table.batch_get(&[key]).await.unwrap().is_empty());
    }
}
