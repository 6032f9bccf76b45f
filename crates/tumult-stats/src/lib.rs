//! Tumult statistics engine.
//!
//! Aggregates externally supplied numeric samples into fixed-width time
//! windows. Producers push `(time, value)` pairs into a [`Bucket`]; report and
//! plot collaborators later pull [`BucketRecord`]s or [`Series`] out of it.
//!
//! # Design
//!
//! Everything in this crate is synchronous and free of I/O. Sample timestamps
//! are offsets from the start of a simulation run, supplied by the caller, so
//! the same sample stream always aggregates to the same records.
//!
//! - [`Bucket`]: one mutex per bucket, safe for many concurrent producers
//! - [`OutlierFilter`]: optional sliding-window pre-processing stage
//! - [`Series`]: ordered, append-only points for plotting
//! - [`StatsSnapshot`]: serializable hand-off to report generators

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bucket;
mod error;
mod outlier;
mod series;
mod snapshot;

pub use bucket::{Bucket, BucketRecord, Statistic};
pub use error::StatsError;
pub use outlier::{FilterMode, OutlierFilter, Sample};
pub use series::{Point, Series};
pub use snapshot::{BucketSnapshot, StatsSnapshot};
