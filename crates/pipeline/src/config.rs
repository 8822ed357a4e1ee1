use std::time::Duration;

use logcount_analysis::DEFAULT_SERVER_ID;

use crate::error::Error;

/// Tuning for the windowed pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Length of one accumulation window for both windowed stages.
    pub window: Duration,

    /// Capacity of each queue between stages.
    pub queue_capacity: usize,

    /// Server id assigned to lines without a `serverID:` prefix.
    pub default_server_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            queue_capacity: 1000,
            default_server_id: DEFAULT_SERVER_ID.to_string(),
        }
    }
}

impl PipelineConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.window.is_zero() {
            return Err(Error::InvalidConfig("window must be non-zero"));
        }

        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacity must be non-zero"));
        }

        Ok(())
    }
}
