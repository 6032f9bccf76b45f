//! Statistics error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from bucket, series and filter operations.
#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    /// Sample value is NaN or infinite.
    #[error("sample value is not finite: {value}")]
    NonFinite {
        /// The rejected value.
        value: f64,
    },

    /// Bucket window length must be positive.
    #[error("bucket time must be positive")]
    ZeroBucketTime,

    /// Outlier filter configuration is unusable.
    #[error("invalid outlier filter: window size {window_size}, threshold {threshold}")]
    InvalidFilter {
        /// Configured window size.
        window_size: usize,
        /// Configured threshold.
        threshold: usize,
    },

    /// A series point would go backwards on the x axis.
    #[error("series {series} is append-only: x={x} precedes last x={last}")]
    NonMonotonic {
        /// Series name.
        series: String,
        /// Rejected x coordinate.
        x: f64,
        /// Last accepted x coordinate.
        last: f64,
    },

    /// Sample timestamp precedes the last one accepted by a filter.
    #[error("sample at {time:?} precedes previous sample at {previous:?}")]
    OutOfOrder {
        /// Rejected sample time.
        time: Duration,
        /// Time of the last accepted sample.
        previous: Duration,
    },

    /// Snapshot encoding or decoding failed.
    #[error("snapshot codec error: {0}")]
    Codec(String),
}
