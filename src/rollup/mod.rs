//! Statistical rollups
//!
//! Incrementally-maintained hourly and daily summaries over raw metric
//! rows and over computed costs. Each bucket is recomputed from the raw
//! rows in its window and written as a whole row, so a retried refresh
//! can never leave a half-updated summary.

pub mod engine;
pub mod stats;

pub use engine::{RefreshOutcome, RollupEngine, RollupSource};

use crate::config::{MS_PER_DAY, MS_PER_HOUR};
use serde::{Deserialize, Serialize};

/// Rollup bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketWidth {
    /// One-hour buckets
    Hourly,
    /// One-day buckets
    Daily,
}

impl BucketWidth {
    /// Bucket duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        match self {
            BucketWidth::Hourly => MS_PER_HOUR,
            BucketWidth::Daily => MS_PER_DAY,
        }
    }

    /// Start of the bucket containing a timestamp
    pub fn bucket_start(&self, time: i64) -> i64 {
        let width = self.duration_ms();
        time.div_euclid(width) * width
    }

    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketWidth::Hourly => "hourly",
            BucketWidth::Daily => "daily",
        }
    }
}

/// Key of one rollup row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupKey {
    /// Bucket start, milliseconds
    pub bucket_start: i64,
    /// Device
    pub device_id: String,
    /// Metric type
    pub metric_type: String,
}

/// One pre-aggregated summary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    /// Bucket start, milliseconds
    pub bucket_start: i64,
    /// Device
    pub device_id: String,
    /// Metric type
    pub metric_type: String,
    /// Number of raw rows in the bucket
    pub sample_count: u64,
    /// Mean value
    pub avg: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Sum of values
    pub sum: f64,
    /// Median
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Population standard deviation
    pub stddev: f64,
}
