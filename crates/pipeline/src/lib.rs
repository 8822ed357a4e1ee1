//! Windowed map-reduce over access-log lines.
//!
//! Lines flow through three concurrent stages: ingestion parses and maps
//! each line, reduction sums map outputs per key once per window, and
//! persistence merges each window's sums into a [`CountStore`].
//!
//! [`CountStore`]: logcount_counts::CountStore
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod metrics;
mod pipeline;
pub mod stages;

pub use config::PipelineConfig;
pub use error::Error;
pub use metrics::PipelineMetrics;
pub use pipeline::Pipeline;
