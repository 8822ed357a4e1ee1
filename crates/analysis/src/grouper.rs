use std::collections::HashMap;

use crate::model::{GroupKey, MapOutput};

/// Partitions map outputs by [`GroupKey`].
///
/// Outputs keep their encounter order inside a bucket. Iteration order over
/// the returned map is unspecified; callers must not depend on it.
pub fn group_by_key<I>(batch: I) -> HashMap<GroupKey, Vec<MapOutput>>
where
    I: IntoIterator<Item = MapOutput>,
{
    let mut grouped: HashMap<GroupKey, Vec<MapOutput>> = HashMap::new();

    for output in batch {
        grouped.entry(output.key()).or_default().push(output);
    }

    grouped
}
