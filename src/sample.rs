//! Metric samples
//!
//! Raw readings ingested from devices. Samples are immutable once
//! written; they are removed only by retention expiry or a device
//! cascade delete.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single validated device reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Timestamp in milliseconds (UTC)
    pub time: i64,
    /// Device the reading came from
    pub device_id: String,
    /// Metric type (e.g. "power", "energy")
    pub metric_type: String,
    /// Reading value
    pub value: f64,
    /// Unit of measurement (e.g. "watts")
    pub unit: String,
    /// Open key-value bag, not validated against a schema
    pub tags: HashMap<String, String>,
}

impl MetricSample {
    /// Create a new sample
    pub fn new(device_id: &str, metric_type: &str, time: i64, value: f64, unit: &str) -> Self {
        Self {
            time,
            device_id: device_id.to_string(),
            metric_type: metric_type.to_string(),
            value,
            unit: unit.to_string(),
            tags: HashMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Add multiple tags
    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Get tag value
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }
}

/// Sample batch for bulk ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleBatch {
    /// Samples in the batch
    pub samples: Vec<MetricSample>,
}

impl SampleBatch {
    /// Create a new batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample to the batch
    pub fn add(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sort by timestamp
    pub fn sort_by_time(&mut self) {
        self.samples.sort_by_key(|s| s.time);
    }
}

impl crate::chunk::ChunkRecord for MetricSample {
    fn time(&self) -> i64 {
        self.time
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn metric_type(&self) -> &str {
        &self.metric_type
    }

    fn encode_segment(rows: &[Self]) -> crate::error::Result<bytes::Bytes> {
        let (device, metric) = match rows.first() {
            Some(row) => (row.device_id.as_str(), row.metric_type.as_str()),
            None => ("", ""),
        };
        crate::chunk::columnar::encode_samples(device, metric, rows)
    }

    fn decode_segment(
        key: &crate::chunk::SegmentKey,
        data: &[u8],
    ) -> crate::error::Result<Vec<Self>> {
        crate::chunk::columnar::decode_samples(&key.device_id, &key.metric_type, data)
    }
}

impl std::iter::FromIterator<MetricSample> for SampleBatch {
    fn from_iter<I: IntoIterator<Item = MetricSample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_creation() {
        let sample = MetricSample::new("plug-1", "power", 1234567890, 125.5, "watts")
            .with_tag("room", "kitchen")
            .with_tag("circuit", "a");

        assert_eq!(sample.device_id, "plug-1");
        assert_eq!(sample.metric_type, "power");
        assert_eq!(sample.value, 125.5);
        assert_eq!(sample.tag("room"), Some("kitchen"));
        assert_eq!(sample.tag("circuit"), Some("a"));
        assert_eq!(sample.tag("missing"), None);
    }

    #[test]
    fn test_sample_batch_sort() {
        let mut batch = SampleBatch::new();
        batch.add(MetricSample::new("d", "power", 1000, 1.0, "watts"));
        batch.add(MetricSample::new("d", "power", 500, 2.0, "watts"));
        batch.add(MetricSample::new("d", "power", 1500, 3.0, "watts"));

        assert_eq!(batch.len(), 3);

        batch.sort_by_time();
        assert_eq!(batch.samples[0].time, 500);
        assert_eq!(batch.samples[1].time, 1000);
        assert_eq!(batch.samples[2].time, 1500);
    }
}
