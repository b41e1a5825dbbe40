//! Data lifecycle management
//!
//! Drives the three recurring maintenance tasks on independent
//! cadences:
//! - Chunk compression of aged open chunks
//! - Incremental rollup refresh
//! - Retention-based expiry of chunks and rollup rows
//!
//! Tasks run concurrently with each other and with foreground
//! ingestion and queries; a failed or timed-out run is logged and
//! retried on the next tick, never fatal to the loop.

pub mod scheduler;

pub use scheduler::LifecycleScheduler;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Enable the background loops
    pub enabled: bool,
    /// Interval between compression passes
    pub compression_interval: Duration,
    /// Interval between rollup refresh passes
    pub refresh_interval: Duration,
    /// Interval between retention passes
    pub retention_interval: Duration,
    /// Bound on a single task run; on timeout the run is abandoned
    /// between atomic steps and retried next cycle
    pub task_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compression_interval: Duration::from_secs(900),
            refresh_interval: Duration::from_secs(300),
            retention_interval: Duration::from_secs(3600),
            task_timeout: Duration::from_secs(120),
        }
    }
}

impl LifecycleConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression cadence
    pub fn with_compression_interval(mut self, interval: Duration) -> Self {
        self.compression_interval = interval;
        self
    }

    /// Set the rollup refresh cadence
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the retention cadence
    pub fn with_retention_interval(mut self, interval: Duration) -> Self {
        self.retention_interval = interval;
        self
    }

    /// Set the per-run timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Snapshot of one task's counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskStats {
    /// Ticks executed
    pub runs: u64,
    /// Ticks that failed or timed out
    pub failures: u64,
    /// Timestamp of the last successful run, if any
    pub last_success_ms: Option<i64>,
}

/// Snapshot of all scheduler task counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Compression task
    pub compression: TaskStats,
    /// Rollup refresh task
    pub refresh: TaskStats,
    /// Retention task
    pub retention: TaskStats,
}
