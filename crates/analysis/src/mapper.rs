use crate::model::{AggregationDimension, LogEntry, MapOutput};

/// Emits one count-of-one observation per dimension for `entry`.
#[must_use]
pub fn map_entry(entry: &LogEntry) -> [MapOutput; 2] {
    [
        MapOutput {
            server_id: entry.server_id.clone(),
            dimension: AggregationDimension::Ip,
            value: entry.client_ip.clone(),
            count: 1,
        },
        MapOutput {
            server_id: entry.server_id.clone(),
            dimension: AggregationDimension::Endpoint,
            value: entry.endpoint.clone(),
            count: 1,
        },
    ]
}
