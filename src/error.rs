//! Error types for Wattline
//!
//! This module defines the main error type used throughout the storage,
//! rollup, tariff, and lifecycle layers.

use thiserror::Error;

/// Result type alias for Wattline operations
pub type Result<T> = std::result::Result<T, WattlineError>;

/// Main error type for Wattline
#[derive(Error, Debug)]
pub enum WattlineError {
    #[error("out-of-order write: time={time} targets a {state} chunk starting at {chunk_start}")]
    OutOfOrderWrite {
        time: i64,
        chunk_start: i64,
        state: &'static str,
    },

    #[error("no matching rate period: rate_id={rate_id}, timestamp={timestamp}")]
    NoMatchingPeriod { rate_id: String, timestamp: i64 },

    #[error("chunk compression failed: chunk_start={chunk_start}, {reason}")]
    ChunkCompression { chunk_start: i64, reason: String },

    #[error("retention refused: chunk ending at {chunk_end} is not yet covered by rollup watermark {watermark}")]
    RetentionOrdering { chunk_end: i64, watermark: i64 },

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("corrupted chunk data: {0}")]
    CorruptedChunk(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WattlineError::OutOfOrderWrite {
            time: 500,
            chunk_start: 0,
            state: "compressed",
        };
        let msg = err.to_string();
        assert!(msg.contains("out-of-order"));
        assert!(msg.contains("compressed"));

        let err = WattlineError::RetentionOrdering {
            chunk_end: 1000,
            watermark: 500,
        };
        assert!(err.to_string().contains("watermark 500"));
    }
}
