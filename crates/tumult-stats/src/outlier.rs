//! Sliding-window outlier removal.
//!
//! The filter buffers the last `window_size` samples and judges the buffered
//! window against its own average. When the samples strictly on one side of
//! the average number at most `threshold` while the other side has more than
//! `threshold`, every sample on the minority side is an outlier. A full window
//! is judged on each push and whatever remains is judged once more on
//! [`OutlierFilter::flush`], so a spike in the last samples of a run is caught
//! as well.
//!
//! Samples leave the filter from the front of the window, so emitted
//! timestamps are monotonic whenever the input is.

use std::{collections::VecDeque, time::Duration};

use crate::error::StatsError;

/// A timestamped sample. `time` is an offset from the start of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Offset from the start of the run.
    pub time: Duration,
    /// Sample value.
    pub value: f64,
}

impl Sample {
    /// Create a sample.
    pub fn new(time: Duration, value: f64) -> Self {
        Self { time, value }
    }
}

/// What happens to a sample judged to be an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Drop the sample entirely.
    #[default]
    Discard,
    /// Keep the timestamp, replace the value with the mean of the rest of the
    /// window.
    Smooth,
}

/// Sliding-window outlier filter.
#[derive(Debug, Clone)]
pub struct OutlierFilter {
    window_size: usize,
    threshold: usize,
    mode: FilterMode,
    window: VecDeque<Sample>,
    sum: f64,
    last_time: Option<Duration>,
    removed: u64,
}

impl OutlierFilter {
    /// Create a filter.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidFilter` if `window_size < 3` (there is no
    /// middle sample with neighbors on both sides) or if `threshold` is large
    /// enough that no window could ever have a majority side above it.
    pub fn new(window_size: usize, threshold: usize, mode: FilterMode) -> Result<Self, StatsError> {
        if window_size < 3 || threshold >= window_size - 1 {
            return Err(StatsError::InvalidFilter { window_size, threshold });
        }

        Ok(Self {
            window_size,
            threshold,
            mode,
            window: VecDeque::with_capacity(window_size),
            sum: 0.0,
            last_time: None,
            removed: 0,
        })
    }

    /// Configured window size.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Configured threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of samples discarded or smoothed so far.
    pub fn removed(&self) -> u64 {
        self.removed
    }

    /// Number of samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Timestamp of the most recent accepted sample.
    pub fn last_time(&self) -> Option<Duration> {
        self.last_time
    }

    /// Push a sample. Returns the sample leaving the window, if any.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonFinite` for NaN or infinite values and
    /// `StatsError::OutOfOrder` if `sample.time` precedes the previous sample.
    pub fn push(&mut self, sample: Sample) -> Result<Option<Sample>, StatsError> {
        if !sample.value.is_finite() {
            return Err(StatsError::NonFinite { value: sample.value });
        }
        if let Some(previous) = self.last_time {
            if sample.time < previous {
                return Err(StatsError::OutOfOrder { time: sample.time, previous });
            }
        }

        self.last_time = Some(sample.time);
        self.window.push_back(sample);
        self.sum += sample.value;

        if self.window.len() < self.window_size {
            return Ok(None);
        }

        self.judge_window();

        if self.window.len() < self.window_size {
            // outliers were discarded; wait for the window to refill
            return Ok(None);
        }

        let emitted = self.window.pop_front();
        if let Some(s) = emitted {
            self.sum -= s.value;
        }
        Ok(emitted)
    }

    /// Judge the buffered tail, then release it oldest first.
    pub fn flush(&mut self) -> Vec<Sample> {
        self.judge_window();
        self.sum = 0.0;
        self.window.drain(..).collect()
    }

    /// Remove or smooth the minority side of the buffered window.
    fn judge_window(&mut self) {
        let len = self.window.len();
        if len < 3 {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = self.sum / len as f64;

        let nr_above = self.window.iter().filter(|s| s.value > avg).count();
        let nr_below = self.window.iter().filter(|s| s.value < avg).count();

        let is_outlier: fn(f64, f64) -> bool =
            if nr_above <= self.threshold && nr_below > self.threshold {
                |value, avg| value > avg
            } else if nr_below <= self.threshold && nr_above > self.threshold {
                |value, avg| value < avg
            } else {
                return;
            };

        let (outliers, kept): (Vec<Sample>, Vec<Sample>) =
            self.window.iter().partition(|s| is_outlier(s.value, avg));
        if outliers.is_empty() || kept.is_empty() {
            return;
        }
        self.removed += outliers.len() as u64;

        match self.mode {
            FilterMode::Discard => {
                for s in &outliers {
                    tracing::debug!(time = ?s.time, value = s.value, avg, "discarding outlier");
                }
                self.window.retain(|s| !is_outlier(s.value, avg));
            },
            FilterMode::Smooth => {
                #[allow(clippy::cast_precision_loss)]
                let smoothed = kept.iter().map(|s| s.value).sum::<f64>() / kept.len() as f64;
                for s in self.window.iter_mut().filter(|s| is_outlier(s.value, avg)) {
                    tracing::debug!(time = ?s.time, value = s.value, smoothed, "smoothing outlier");
                    s.value = smoothed;
                }
            },
        }
        self.sum = self.window.iter().map(|s| s.value).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(filter: &mut OutlierFilter, values: &[f64]) -> Vec<Sample> {
        let mut out = Vec::new();
        for (i, v) in values.iter().enumerate() {
            let sample = Sample::new(Duration::from_millis(i as u64 * 10), *v);
            if let Some(s) = filter.push(sample).unwrap() {
                out.push(s);
            }
        }
        out
    }

    #[test]
    fn rejects_degenerate_configuration() {
        assert!(OutlierFilter::new(2, 0, FilterMode::Discard).is_err());
        assert!(OutlierFilter::new(5, 4, FilterMode::Discard).is_err());
        assert!(OutlierFilter::new(5, 1, FilterMode::Discard).is_ok());
    }

    #[test]
    fn holds_samples_until_window_fills() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let out = feed(&mut filter, &[1.0, 1.0, 1.0, 1.0]);
        assert!(out.is_empty());
        assert_eq!(filter.buffered(), 4);
    }

    #[test]
    fn spike_filling_the_window_is_discarded() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let mut out = feed(&mut filter, &[1.0, 1.0, 1.0, 1.0, 100.0]);
        assert_eq!(filter.removed(), 1);
        assert_eq!(filter.buffered(), 4);

        out.extend(filter.flush());
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|s| (s.value - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn spike_is_not_emitted_as_the_window_slides() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let mut out = feed(&mut filter, &[1.0, 1.0, 1.0, 1.0, 100.0]);

        for i in 5..7u64 {
            let s = Sample::new(Duration::from_millis(i * 10), 1.0);
            out.extend(filter.push(s).unwrap());
        }
        assert_eq!(filter.removed(), 1);

        out.extend(filter.flush());
        assert!(out.iter().all(|s| (s.value - 1.0).abs() < f64::EPSILON));
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn smoothing_keeps_the_timestamp() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Smooth).unwrap();
        let mut out = feed(&mut filter, &[1.0, 1.0, 1.0, 1.0, 100.0, 1.0, 1.0]);
        out.extend(filter.flush());

        assert_eq!(out.len(), 7);
        let spike = out.iter().find(|s| s.time == Duration::from_millis(40)).unwrap();
        assert!((spike.value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn spike_in_short_tail_is_judged_on_flush() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let mut out = feed(&mut filter, &[1.0, 1.0, 100.0]);
        assert_eq!(filter.removed(), 0);

        out.extend(filter.flush());
        assert_eq!(filter.removed(), 1);
        assert_eq!(out.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 1.0]);
    }

    #[test]
    fn emitted_timestamps_stay_monotonic() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Smooth).unwrap();
        let mut out = feed(&mut filter, &[3.0, 90.0, 3.0, 3.0, 3.0, -70.0, 3.0, 3.0, 3.0, 3.0]);
        out.extend(filter.flush());
        assert_eq!(out.len(), 10);
        assert!(out.windows(2).all(|pair| pair[0].time <= pair[1].time));
        assert!(out.iter().all(|s| (s.value - 3.0).abs() < f64::EPSILON));
    }

    #[test]
    fn low_spike_is_removed_symmetrically() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let mut out = feed(&mut filter, &[50.0, 50.0, -400.0, 50.0, 50.0]);
        out.extend(filter.flush());
        assert_eq!(filter.removed(), 1);
        assert!(out.iter().all(|s| s.value > 0.0));
    }

    #[test]
    fn balanced_window_is_left_alone() {
        let mut filter = OutlierFilter::new(5, 1, FilterMode::Discard).unwrap();
        let mut out = feed(&mut filter, &[1.0, 9.0, 2.0, 8.0, 3.0, 7.0]);
        out.extend(filter.flush());
        assert_eq!(filter.removed(), 0);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn rejects_time_going_backwards() {
        let mut filter = OutlierFilter::new(3, 0, FilterMode::Discard).unwrap();
        filter.push(Sample::new(Duration::from_secs(2), 1.0)).unwrap();
        let err = filter.push(Sample::new(Duration::from_secs(1), 1.0)).unwrap_err();
        assert!(matches!(err, StatsError::OutOfOrder { .. }));
    }

    #[test]
    fn rejects_nan() {
        let mut filter = OutlierFilter::new(3, 0, FilterMode::Discard).unwrap();
        assert!(filter.push(Sample::new(Duration::ZERO, f64::NAN)).is_err());
    }
}
