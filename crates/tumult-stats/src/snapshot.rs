//! Serializable hand-off of aggregated statistics.
//!
//! Report and plot generators live outside the engine; they receive a
//! [`StatsSnapshot`], either in memory or CBOR-encoded.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    bucket::{Bucket, BucketRecord},
    error::StatsError,
};

/// Records of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Bucket identifier.
    pub id: String,
    /// Window length.
    pub bucket_time: Duration,
    /// Samples removed or smoothed by the outlier filter.
    pub outliers_removed: u64,
    /// Aggregated windows, oldest first.
    pub records: Vec<BucketRecord>,
}

impl BucketSnapshot {
    /// Capture the current records of a bucket.
    pub fn capture(bucket: &Bucket) -> Self {
        Self {
            id: bucket.id().to_string(),
            bucket_time: bucket.bucket_time(),
            outliers_removed: bucket.outliers_removed(),
            records: bucket.records(),
        }
    }
}

/// Everything a report generator needs from a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Per-bucket records, ordered by bucket id.
    pub buckets: Vec<BucketSnapshot>,
    /// Process-wide counters.
    pub counters: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Look up a bucket by id.
    pub fn bucket(&self, id: &str) -> Option<&BucketSnapshot> {
        self.buckets.iter().find(|b| b.id == id)
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, StatsError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| StatsError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, StatsError> {
        ciborium::from_reader(bytes).map_err(|e| StatsError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_cbor() {
        let bucket = Bucket::new("rtt", Duration::from_secs(1)).unwrap();
        bucket.add(Duration::from_millis(10), 3.0).unwrap();

        let mut snapshot = StatsSnapshot::default();
        snapshot.buckets.push(BucketSnapshot::capture(&bucket));
        snapshot.counters.insert("sent".to_string(), 7);

        let bytes = snapshot.to_cbor().unwrap();
        let decoded = StatsSnapshot::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.bucket("rtt").unwrap().records[0].count, 1);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = StatsSnapshot::from_cbor(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, StatsError::Codec(_)));
    }
}
