use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::record::{self, Record};
use crate::Result;

/// Shared in-memory currency table.
///
/// Every read and write goes through one exclusive lock. Callers only ever
/// receive clones, so a search result cannot alias the stored rows.
pub struct RecordStore {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    /// Creates a store holding `records` in the given order.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Loads the store from a `country,name,code,number` CSV file.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let records = record::load_csv(path)?;
        Ok(Self::from_records(records))
    }

    /// Returns every record whose code or number matches, in store order.
    pub async fn search(&self, code: &str, number: i32) -> Vec<Record> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|record| record.matches(code, number))
            .cloned()
            .collect()
    }

    /// Appends all of `batch` after the existing records.
    pub async fn add(&self, batch: Vec<Record>) {
        let mut records = self.records.lock().await;
        let added = batch.len();
        records.extend(batch);
        debug!(added, total = records.len(), "records appended");
    }

    /// Returns a copy of every stored record.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Returns true if the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Number of live handles sharing this table.
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.records)
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RecordStore {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}
