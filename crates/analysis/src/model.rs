use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single parsed access-log line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Server that produced the line, or the parser's default server id.
    pub server_id: String,

    /// Client address as written in the line.
    pub client_ip: String,

    /// Request time, normalised to UTC.
    pub timestamp: DateTime<Utc>,

    /// Upper-case HTTP method.
    pub method: String,

    /// Request path.
    pub endpoint: String,

    /// Three-digit response status.
    pub status_code: u16,

    /// Quoted user agent.
    pub user_agent: String,
}

/// The dimensions counted per server.
///
/// This set is closed. Adding a dimension means emitting one more record
/// from [`crate::map_entry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationDimension {
    /// Distinct client addresses.
    Ip,

    /// Distinct request paths.
    Endpoint,
}

impl AggregationDimension {
    /// Textual form used in storage and on the query API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Endpoint => "endpoint",
        }
    }
}

impl Display for AggregationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(Self::Ip),
            "endpoint" => Ok(Self::Endpoint),
            other => Err(format!("unknown aggregation dimension: {other}")),
        }
    }
}

/// A partial count observed for one key before reduction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOutput {
    /// Server the observation belongs to.
    pub server_id: String,

    /// Which dimension `value` belongs to.
    #[serde(rename = "type")]
    pub dimension: AggregationDimension,

    /// Client address or endpoint.
    pub value: String,

    /// Number of observations; `1` when emitted from a single entry.
    pub count: u64,
}

impl MapOutput {
    /// Returns the composite key this output is summed under.
    #[must_use]
    pub fn key(&self) -> GroupKey {
        GroupKey {
            server_id: self.server_id.clone(),
            dimension: self.dimension,
            value: self.value.clone(),
        }
    }
}

/// Composite key identifying map outputs that must be summed together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Server component.
    pub server_id: String,

    /// Dimension component.
    #[serde(rename = "type")]
    pub dimension: AggregationDimension,

    /// Value component.
    pub value: String,
}

impl GroupKey {
    /// Creates a new key.
    pub fn new(
        server_id: impl Into<String>,
        dimension: AggregationDimension,
        value: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            dimension,
            value: value.into(),
        }
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.server_id, self.dimension, self.value)
    }
}

/// One window's contribution to the running total of a key.
///
/// This is not the running total itself; stores merge it additively.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceOutput {
    /// Server component of the key.
    pub server_id: String,

    /// Dimension component of the key.
    #[serde(rename = "type")]
    pub dimension: AggregationDimension,

    /// Value component of the key.
    pub value: String,

    /// Sum of the counts reduced in this window.
    pub count: u64,

    /// Time of reduction.
    pub created_at: DateTime<Utc>,

    /// Time of reduction.
    pub updated_at: DateTime<Utc>,
}

impl ReduceOutput {
    /// Returns the composite key of this aggregate.
    #[must_use]
    pub fn key(&self) -> GroupKey {
        GroupKey {
            server_id: self.server_id.clone(),
            dimension: self.dimension,
            value: self.value.clone(),
        }
    }
}
