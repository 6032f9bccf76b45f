//! Property tests for bucket aggregation and outlier filtering.

use std::time::Duration;

use proptest::prelude::*;
use tumult_stats::{Bucket, FilterMode, OutlierFilter, Sample};

proptest! {
    #[test]
    fn prop_every_sample_is_counted_once(
        samples in prop::collection::vec((0u64..10_000, -1e6f64..1e6), 0..200),
        bucket_ms in 1u64..2_000,
    ) {
        let bucket = Bucket::new("p", Duration::from_millis(bucket_ms)).unwrap();
        for (t, v) in &samples {
            bucket.add(Duration::from_millis(*t), *v).unwrap();
        }

        let records = bucket.records();
        let total: u64 = records.iter().map(|r| r.count).sum();
        prop_assert_eq!(total, samples.len() as u64);

        for r in &records {
            prop_assert!(r.min <= r.mean + 1e-6 && r.mean <= r.max + 1e-6);
            prop_assert_eq!(r.stop - r.start, Duration::from_millis(bucket_ms));
        }

        // PROPERTY: windows never overlap and come out ordered
        for pair in records.windows(2) {
            prop_assert!(pair[0].stop <= pair[1].start);
        }
    }

    #[test]
    fn prop_filter_output_is_monotonic_and_bounded(
        values in prop::collection::vec(-1e3f64..1e3, 0..120),
        window_size in 3usize..9,
        smooth in any::<bool>(),
    ) {
        let threshold = (window_size - 2) / 2;
        let mode = if smooth { FilterMode::Smooth } else { FilterMode::Discard };
        let mut filter = OutlierFilter::new(window_size, threshold, mode).unwrap();

        let mut out = Vec::new();
        for (i, v) in values.iter().enumerate() {
            out.extend(filter.push(Sample::new(Duration::from_millis(i as u64), *v)).unwrap());
        }
        out.extend(filter.flush());

        for pair in out.windows(2) {
            prop_assert!(pair[0].time <= pair[1].time);
        }

        let removed = usize::try_from(filter.removed()).unwrap();
        match mode {
            FilterMode::Discard => prop_assert_eq!(out.len() + removed, values.len()),
            FilterMode::Smooth => prop_assert_eq!(out.len(), values.len()),
        }
    }
}
