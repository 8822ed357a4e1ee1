//! Parsing and map-reduce primitives for counting access-log traffic.
//!
//! A raw line is parsed into a [`LogEntry`], mapped into one [`MapOutput`]
//! per [`AggregationDimension`], grouped by [`GroupKey`] and reduced into a
//! [`ReduceOutput`] carrying the summed count for one window.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod grouper;
mod mapper;
mod model;
mod parser;
mod reducer;

pub use error::ParseError;
pub use grouper::group_by_key;
pub use mapper::map_entry;
pub use model::{AggregationDimension, GroupKey, LogEntry, MapOutput, ReduceOutput};
pub use parser::{DEFAULT_SERVER_ID, LogParser, parse_line};
pub use reducer::{reduce_batch, reduce_group, reduce_group_at};
