use chrono::{DateTime, Utc};
use logcount_analysis::{AggregationDimension, GroupKey};
use serde::{Deserialize, Serialize};

/// The persisted running total for one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecord {
    /// Server component of the key.
    pub server_id: String,

    /// Dimension component of the key.
    #[serde(rename = "type")]
    pub dimension: AggregationDimension,

    /// Value component of the key.
    pub value: String,

    /// Sum of every count merged into this record.
    pub count: u64,

    /// Time of the first merge.
    pub created_at: DateTime<Utc>,

    /// Time of the latest merge.
    pub updated_at: DateTime<Utc>,
}

impl CountRecord {
    /// Returns the composite key of this record.
    #[must_use]
    pub fn key(&self) -> GroupKey {
        GroupKey {
            server_id: self.server_id.clone(),
            dimension: self.dimension,
            value: self.value.clone(),
        }
    }
}

/// Why an aggregate could not be merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Adding the count would overflow the stored total.
    CountOverflow,
}

/// An aggregate that was left out of an otherwise applied batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedUpsert {
    /// Key of the rejected aggregate.
    pub key: GroupKey,

    /// Why it was rejected.
    pub reason: RejectReason,
}

/// Outcome of one `upsert_counts` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Aggregates that created a new record.
    pub inserted: usize,

    /// Aggregates added onto an existing record.
    pub updated: usize,

    /// Aggregates that could not be merged.
    pub rejected: Vec<RejectedUpsert>,
}

impl UpsertReport {
    /// Number of aggregates merged.
    #[must_use]
    pub const fn applied(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Selects records by key components and last-update time.
///
/// Unset fields match everything. The time range is inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountFilter {
    /// Only records of this server.
    pub server_id: Option<String>,

    /// Only records of this dimension.
    #[serde(rename = "type")]
    pub dimension: Option<AggregationDimension>,

    /// Only records updated at or after this time.
    pub from: Option<DateTime<Utc>>,

    /// Only records updated at or before this time.
    pub to: Option<DateTime<Utc>>,
}

impl CountFilter {
    /// Returns true when `record` is selected by this filter.
    #[must_use]
    pub fn matches(&self, record: &CountRecord) -> bool {
        self.server_id
            .as_ref()
            .is_none_or(|server_id| *server_id == record.server_id)
            && self
                .dimension
                .is_none_or(|dimension| dimension == record.dimension)
            && self.from.is_none_or(|from| record.updated_at >= from)
            && self.to.is_none_or(|to| record.updated_at <= to)
    }
}
