//! Time-bucketed aggregation.
//!
//! Samples are grouped into non-overlapping windows of `bucket_time` length,
//! window `k` covering `[k * bucket_time, (k + 1) * bucket_time)`, and each
//! window is reduced to a [`BucketRecord`].

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::StatsError,
    outlier::{OutlierFilter, Sample},
    series::Series,
};

/// Aggregate of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// Window start (inclusive), offset from the start of the run.
    pub start: Duration,
    /// Window end (exclusive).
    pub stop: Duration,
    /// Number of samples in the window.
    pub count: u64,
    /// Sum of the samples.
    pub sum: f64,
    /// Arithmetic mean of the samples.
    pub mean: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

/// Which field of a [`BucketRecord`] to plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    /// Sample count per window.
    Count,
    /// Sum per window.
    Sum,
    /// Mean per window.
    Mean,
    /// Minimum per window.
    Min,
    /// Maximum per window.
    Max,
}

impl Statistic {
    /// Suffix used when naming series derived from a bucket.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn pick(self, record: &BucketRecord) -> f64 {
        match self {
            Self::Count => record.count as f64,
            Self::Sum => record.sum,
            Self::Mean => record.mean,
            Self::Min => record.min,
            Self::Max => record.max,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new(value: f64) -> Self {
        Self { count: 1, sum: value, min: value, max: value }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

#[derive(Debug)]
struct BucketState {
    filter: Option<OutlierFilter>,
    windows: BTreeMap<u64, Accumulator>,
    samples: u64,
}

/// Named, time-windowed aggregator.
///
/// All state sits behind one mutex, so `add` may be called from any number of
/// concurrent producers.
#[derive(Debug)]
pub struct Bucket {
    id: String,
    bucket_time: Duration,
    state: Mutex<BucketState>,
}

impl Bucket {
    /// Create a bucket without outlier filtering.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::ZeroBucketTime` if `bucket_time` is zero.
    pub fn new(id: impl Into<String>, bucket_time: Duration) -> Result<Self, StatsError> {
        if bucket_time.is_zero() {
            return Err(StatsError::ZeroBucketTime);
        }

        Ok(Self {
            id: id.into(),
            bucket_time,
            state: Mutex::new(BucketState { filter: None, windows: BTreeMap::new(), samples: 0 }),
        })
    }

    /// Attach an outlier filter in front of the aggregation.
    #[must_use]
    pub fn with_outlier_filter(self, filter: OutlierFilter) -> Self {
        let mut state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        state.filter = Some(filter);
        Self { id: self.id, bucket_time: self.bucket_time, state: Mutex::new(state) }
    }

    /// Bucket identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Window length.
    pub fn bucket_time(&self) -> Duration {
        self.bucket_time
    }

    /// Number of samples aggregated so far (after filtering).
    pub fn sample_count(&self) -> u64 {
        self.lock().samples
    }

    /// Number of samples the outlier filter has removed or smoothed.
    pub fn outliers_removed(&self) -> u64 {
        self.lock().filter.as_ref().map_or(0, OutlierFilter::removed)
    }

    /// Add a sample taken `time` after the start of the run.
    ///
    /// With a filter attached, a sample stamped earlier than the filter's
    /// latest sample (a concurrent producer losing the race for the lock) is
    /// restamped with that latest time so the filter input stays monotonic.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonFinite` if `value` is NaN or infinite.
    pub fn add(&self, time: Duration, value: f64) -> Result<(), StatsError> {
        if !value.is_finite() {
            return Err(StatsError::NonFinite { value });
        }

        let mut state = self.lock();
        let bucket_time = self.bucket_time;

        let emitted = match state.filter.as_mut() {
            Some(filter) => {
                let time = filter.last_time().map_or(time, |last| time.max(last));
                filter.push(Sample::new(time, value))?
            },
            None => Some(Sample::new(time, value)),
        };

        if let Some(sample) = emitted {
            accumulate(&mut state, bucket_time, sample);
        }

        Ok(())
    }

    /// Push any samples held by the outlier filter into the aggregation.
    pub fn flush(&self) {
        let mut state = self.lock();
        let bucket_time = self.bucket_time;

        let pending = state.filter.as_mut().map(OutlierFilter::flush).unwrap_or_default();
        for sample in pending {
            accumulate(&mut state, bucket_time, sample);
        }
    }

    /// Aggregated windows, oldest first. Empty windows are omitted.
    pub fn records(&self) -> Vec<BucketRecord> {
        let state = self.lock();

        state
            .windows
            .iter()
            .map(|(index, acc)| {
                let start = window_start(self.bucket_time, *index);
                #[allow(clippy::cast_precision_loss)]
                let mean = acc.sum / acc.count as f64;
                BucketRecord {
                    start,
                    stop: start + self.bucket_time,
                    count: acc.count,
                    sum: acc.sum,
                    mean,
                    min: acc.min,
                    max: acc.max,
                }
            })
            .collect()
    }

    /// Project one statistic of every window onto a series. The x coordinate
    /// is the window start in seconds.
    pub fn series(&self, statistic: Statistic) -> Series {
        let mut series = Series::new(format!("{}.{}", self.id, statistic.as_str()));
        for record in self.records() {
            // records are ordered by window start, push cannot fail
            let _ = series.push(record.start.as_secs_f64(), statistic.pick(&record));
        }
        series
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn accumulate(state: &mut BucketState, bucket_time: Duration, sample: Sample) {
    let index = window_index(bucket_time, sample.time);
    state
        .windows
        .entry(index)
        .and_modify(|acc| acc.add(sample.value))
        .or_insert_with(|| Accumulator::new(sample.value));
    state.samples += 1;
}

#[allow(clippy::cast_possible_truncation)]
fn window_index(bucket_time: Duration, time: Duration) -> u64 {
    (time.as_nanos() / bucket_time.as_nanos()) as u64
}

fn window_start(bucket_time: Duration, index: u64) -> Duration {
    let nanos = bucket_time.as_nanos().saturating_mul(u128::from(index));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
