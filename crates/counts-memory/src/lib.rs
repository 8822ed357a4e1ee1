//! In-memory (single process) implementation of count storage for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use logcount_analysis::{AggregationDimension, GroupKey, ReduceOutput};
use logcount_counts::{CountFilter, CountRecord, CountStore, CountTable, UpsertReport};
use tokio::sync::Mutex;

/// In-memory count store.
#[derive(Clone, Debug, Default)]
pub struct MemoryCountStore {
    table: Arc<Mutex<CountTable>>,
}

impl MemoryCountStore {
    /// Creates a new `MemoryCountStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(CountTable::new())),
        }
    }

    /// Returns a copy of every stored record.
    pub async fn snapshot(&self) -> CountTable {
        self.table.lock().await.clone()
    }
}

#[async_trait]
impl CountStore for MemoryCountStore {
    type Error = Error;

    async fn upsert_counts(&self, outputs: &[ReduceOutput]) -> Result<UpsertReport, Self::Error> {
        let now = Utc::now();
        Ok(self.table.lock().await.apply(outputs, now))
    }

    async fn get(&self, key: &GroupKey) -> Result<Option<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.get(key).cloned())
    }

    async fn query(&self, filter: &CountFilter) -> Result<Vec<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.query(filter))
    }

    async fn top(
        &self,
        dimension: AggregationDimension,
        limit: usize,
    ) -> Result<Vec<CountRecord>, Self::Error> {
        Ok(self.table.lock().await.top(dimension, limit))
    }
}
