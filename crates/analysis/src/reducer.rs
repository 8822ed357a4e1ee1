use chrono::{DateTime, Utc};

use crate::grouper::group_by_key;
use crate::model::{GroupKey, MapOutput, ReduceOutput};

/// Sums the counts of one group, stamped with the current time.
#[must_use]
pub fn reduce_group(key: GroupKey, group: &[MapOutput]) -> ReduceOutput {
    reduce_group_at(key, group, Utc::now())
}

/// Sums the counts of one group, stamped with `now`.
#[must_use]
pub fn reduce_group_at(key: GroupKey, group: &[MapOutput], now: DateTime<Utc>) -> ReduceOutput {
    let count = group
        .iter()
        .fold(0u64, |sum, output| sum.saturating_add(output.count));

    ReduceOutput {
        server_id: key.server_id,
        dimension: key.dimension,
        value: key.value,
        count,
        created_at: now,
        updated_at: now,
    }
}

/// Groups `batch` and reduces every group, producing one output per key.
///
/// All outputs share a single reduction timestamp. Output order is
/// unspecified.
pub fn reduce_batch<I>(batch: I) -> Vec<ReduceOutput>
where
    I: IntoIterator<Item = MapOutput>,
{
    let now = Utc::now();

    group_by_key(batch)
        .into_iter()
        .map(|(key, group)| reduce_group_at(key, &group, now))
        .collect()
}
