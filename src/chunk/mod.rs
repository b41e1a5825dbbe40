//! Chunked time-series storage
//!
//! Partitions rows into fixed-width time intervals ("chunks") and owns
//! their lifecycle:
//! - Chunk creation and append routing
//! - Columnar compression of aged chunks
//! - Chunk-level deletion for retention
//!
//! A chunk moves `Open -> Compressed -> Expired`, never backward.
//! Compression and expiry are idempotent; re-applying either to a chunk
//! that has already transitioned is a no-op.

pub mod columnar;
pub mod store;

pub use store::{ChunkStore, ChunkStoreStats};

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Chunk lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkState {
    /// Actively written, uncompressed
    Open,
    /// Read-only, columnar-encoded
    Compressed,
    /// Deleted past the retention horizon
    Expired,
}

impl ChunkState {
    /// Short name for logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Open => "open",
            ChunkState::Compressed => "compressed",
            ChunkState::Expired => "expired",
        }
    }
}

/// Key identifying a columnar segment within a compressed chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentKey {
    /// Device the segment belongs to
    pub device_id: String,
    /// Metric type of the segment rows
    pub metric_type: String,
}

impl SegmentKey {
    /// Create a new segment key
    pub fn new(device_id: &str, metric_type: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            metric_type: metric_type.to_string(),
        }
    }
}

/// A columnar-encoded run of rows sharing one segment key,
/// ordered by time descending
#[derive(Debug, Clone)]
pub struct Segment {
    /// Segment key
    pub key: SegmentKey,
    /// Number of rows encoded
    pub row_count: u32,
    /// Encoded column data
    pub data: Bytes,
}

/// Reference to the chunk a row was routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Chunk interval start (inclusive), milliseconds
    pub start: i64,
    /// Chunk interval end (exclusive), milliseconds
    pub end: i64,
}

impl ChunkRef {
    /// Check if a timestamp falls within this chunk
    pub fn contains(&self, time: i64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Behavior a row type needs for chunked storage
pub trait ChunkRecord: Clone + Send + Sync + 'static {
    /// Row timestamp in milliseconds
    fn time(&self) -> i64;

    /// Device the row belongs to
    fn device_id(&self) -> &str;

    /// Metric type the row belongs to
    fn metric_type(&self) -> &str;

    /// Segment the row lands in when its chunk is compressed
    fn segment_key(&self) -> SegmentKey {
        SegmentKey::new(self.device_id(), self.metric_type())
    }

    /// Encode one segment's rows (already ordered time descending)
    fn encode_segment(rows: &[Self]) -> Result<Bytes>;

    /// Decode a segment back into rows
    fn decode_segment(key: &SegmentKey, data: &[u8]) -> Result<Vec<Self>>;
}
