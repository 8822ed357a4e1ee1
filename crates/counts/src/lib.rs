//! Abstract interface for stores that accumulate windowed counts.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod record;
mod table;

pub use record::{CountFilter, CountRecord, RejectReason, RejectedUpsert, UpsertReport};
pub use table::CountTable;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use logcount_analysis::{AggregationDimension, GroupKey, ReduceOutput};

/// Marker trait for `CountStore` errors
pub trait CountStoreError: Debug + Error + Send + Sync + 'static {}

/// A store that merges windowed aggregates into running totals.
///
/// # Required Methods
/// - `upsert_counts`: Additively merges a batch of aggregates.
/// - `get`: Looks up the running total of one key.
/// - `query`: Lists running totals matching a filter.
/// - `top`: Lists the highest totals of one dimension.
#[async_trait]
pub trait CountStore: Clone + Send + Sync + 'static {
    /// The error type for the store.
    type Error: CountStoreError;

    /// Merges every aggregate into the stored total for its key.
    ///
    /// A matching record has `count` added and `updated_at` set to the time
    /// of the call; otherwise a record is inserted with that time as both
    /// `created_at` and `updated_at`. Records are applied independently: one
    /// that cannot be applied is listed in the report and does not block the
    /// rest of the batch.
    async fn upsert_counts(&self, outputs: &[ReduceOutput]) -> Result<UpsertReport, Self::Error>;

    /// Returns the running total for `key`, if any.
    async fn get(&self, key: &GroupKey) -> Result<Option<CountRecord>, Self::Error>;

    /// Returns the running totals matching `filter`.
    async fn query(&self, filter: &CountFilter) -> Result<Vec<CountRecord>, Self::Error>;

    /// Returns at most `limit` records of `dimension`, highest count first.
    async fn top(
        &self,
        dimension: AggregationDimension,
        limit: usize,
    ) -> Result<Vec<CountRecord>, Self::Error>;

    /// Returns the most frequent client addresses.
    async fn top_ips(&self, limit: usize) -> Result<Vec<CountRecord>, Self::Error> {
        self.top(AggregationDimension::Ip, limit).await
    }

    /// Returns the most requested endpoints.
    async fn top_endpoints(&self, limit: usize) -> Result<Vec<CountRecord>, Self::Error> {
        self.top(AggregationDimension::Endpoint, limit).await
    }
}
