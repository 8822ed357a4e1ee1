//! Counters describing pipeline throughput and loss.

use std::fmt;

use prometheus::{IntCounter, Opts, Registry};

use crate::error::Error;

/// Pipeline counters, registered on a registry owned by the pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,

    /// Raw lines taken from the source.
    pub lines_received: IntCounter,

    /// Lines discarded because they did not parse.
    pub parse_failures: IntCounter,

    /// Map outputs handed to the reduce stage.
    pub map_outputs: IntCounter,

    /// Reduce outputs handed to the persist stage.
    pub reduce_outputs: IntCounter,

    /// Aggregates merged by the store.
    pub records_persisted: IntCounter,

    /// Aggregates the store refused individually.
    pub records_rejected: IntCounter,

    /// Windows discarded because the store call failed.
    pub flush_failures: IntCounter,

    /// Map outputs lost because the reduce window was cancelled before flushing.
    pub dropped_on_cancel: IntCounter,

    /// Reduce outputs lost because cancellation interrupted their handoff.
    pub reduce_outputs_abandoned: IntCounter,
}

impl PipelineMetrics {
    /// Creates the counters on a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a counter cannot be registered.
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, Error> {
            let counter = IntCounter::with_opts(Opts::new(name, help).namespace("logcount"))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            lines_received: counter("lines_received_total", "Raw lines taken from the source")?,
            parse_failures: counter("parse_failures_total", "Lines discarded as unparseable")?,
            map_outputs: counter("map_outputs_total", "Map outputs handed to the reduce stage")?,
            reduce_outputs: counter(
                "reduce_outputs_total",
                "Reduce outputs handed to the persist stage",
            )?,
            records_persisted: counter("records_persisted_total", "Aggregates merged by the store")?,
            records_rejected: counter(
                "records_rejected_total",
                "Aggregates refused individually by the store",
            )?,
            flush_failures: counter(
                "flush_failures_total",
                "Windows discarded after a failed store call",
            )?,
            dropped_on_cancel: counter(
                "dropped_on_cancel_total",
                "Map outputs dropped by a cancelled reduce window",
            )?,
            reduce_outputs_abandoned: counter(
                "reduce_outputs_abandoned_total",
                "Reduce outputs abandoned during a cancelled handoff",
            )?,
            registry,
        })
    }

    /// Registry holding every pipeline counter.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("lines_received", &self.lines_received.get())
            .field("parse_failures", &self.parse_failures.get())
            .field("map_outputs", &self.map_outputs.get())
            .field("reduce_outputs", &self.reduce_outputs.get())
            .field("records_persisted", &self.records_persisted.get())
            .field("records_rejected", &self.records_rejected.get())
            .field("flush_failures", &self.flush_failures.get())
            .field("dropped_on_cancel", &self.dropped_on_cancel.get())
            .field("reduce_outputs_abandoned", &self.reduce_outputs_abandoned.get())
            .finish_non_exhaustive()
    }
}
