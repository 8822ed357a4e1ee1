use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use logcount_analysis::{AggregationDimension, GroupKey, ReduceOutput};
use serde::{Deserialize, Serialize};

use crate::record::{CountFilter, CountRecord, RejectReason, RejectedUpsert, UpsertReport};

/// Running totals keyed by [`GroupKey`], with additive merge semantics.
///
/// Backends wrap this table and decide how it is guarded and persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CountRecord>", into = "Vec<CountRecord>")]
pub struct CountTable {
    records: HashMap<GroupKey, CountRecord>,
}

impl CountTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merges every aggregate, using `now` as the write time.
    pub fn apply(&mut self, outputs: &[ReduceOutput], now: DateTime<Utc>) -> UpsertReport {
        let mut report = UpsertReport::default();

        for output in outputs {
            let key = output.key();

            if let Some(record) = self.records.get_mut(&key) {
                let Some(count) = record.count.checked_add(output.count) else {
                    report.rejected.push(RejectedUpsert {
                        key,
                        reason: RejectReason::CountOverflow,
                    });
                    continue;
                };

                record.count = count;
                record.updated_at = now;
                report.updated += 1;
            } else {
                self.records.insert(
                    key,
                    CountRecord {
                        server_id: output.server_id.clone(),
                        dimension: output.dimension,
                        value: output.value.clone(),
                        count: output.count,
                        created_at: now,
                        updated_at: now,
                    },
                );
                report.inserted += 1;
            }
        }

        report
    }

    /// Returns the record for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &GroupKey) -> Option<&CountRecord> {
        self.records.get(key)
    }

    /// Returns the records matching `filter`, ordered by key.
    #[must_use]
    pub fn query(&self, filter: &CountFilter) -> Vec<CountRecord> {
        let mut records: Vec<CountRecord> = self
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            (&a.server_id, a.dimension, &a.value).cmp(&(&b.server_id, b.dimension, &b.value))
        });

        records
    }

    /// Returns at most `limit` records of `dimension`, highest count first.
    ///
    /// Ties are ordered by server id, then value.
    #[must_use]
    pub fn top(&self, dimension: AggregationDimension, limit: usize) -> Vec<CountRecord> {
        let mut records: Vec<&CountRecord> = self
            .records
            .values()
            .filter(|record| record.dimension == dimension)
            .collect();

        records.sort_by(|a, b| {
            (Reverse(a.count), &a.server_id, &a.value).cmp(&(
                Reverse(b.count),
                &b.server_id,
                &b.value,
            ))
        });

        records.into_iter().take(limit).cloned().collect()
    }
}

impl From<Vec<CountRecord>> for CountTable {
    fn from(records: Vec<CountRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.key(), record))
                .collect(),
        }
    }
}

impl From<CountTable> for Vec<CountRecord> {
    fn from(table: CountTable) -> Self {
        table.records.into_values().collect()
    }
}
