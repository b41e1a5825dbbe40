//! Energy store
//!
//! The facade the ingestion, configuration, and query layers talk to.
//! Owns the two chunked tables (raw samples, cost records), the rollup
//! engine, the rate-schedule catalog, and the cost engine, and exposes
//! the maintenance passes the lifecycle scheduler drives.

use crate::chunk::{ChunkRef, ChunkStore, ChunkStoreStats};
use crate::config::CoreConfig;
use crate::cost::{CostEngine, CostRecord};
use crate::error::{Result, WattlineError};
use crate::lifecycle::{LifecycleConfig, LifecycleScheduler};
use crate::rollup::{BucketWidth, RollupEngine, RollupRow, RollupSource};
use crate::sample::{MetricSample, SampleBatch};
use crate::tariff::RateSchedule;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Store-wide statistics snapshot
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CoreStats {
    /// Raw sample table
    pub samples: ChunkStoreStats,
    /// Cost record table
    pub costs: ChunkStoreStats,
    /// Rate schedules in the catalog
    pub schedules: usize,
}

/// Top-level engine over chunked storage, rollups, and pricing
pub struct EnergyStore {
    config: CoreConfig,
    samples: Arc<ChunkStore<MetricSample>>,
    costs: Arc<ChunkStore<CostRecord>>,
    rollups: RollupEngine,
    schedules: Arc<RwLock<Vec<RateSchedule>>>,
    pricer: CostEngine,
}

impl EnergyStore {
    /// Create a store from configuration
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let samples = Arc::new(ChunkStore::new(
            "metrics",
            config.chunk_width_ms,
            config.allow_late_writes,
        ));
        let costs = Arc::new(ChunkStore::new(
            "costs",
            config.chunk_width_ms,
            config.allow_late_writes,
        ));
        let rollups = RollupEngine::new(samples.clone(), costs.clone());
        let schedules = Arc::new(RwLock::new(Vec::new()));
        let pricer = CostEngine::new(samples.clone(), costs.clone(), schedules.clone(), &config);

        Ok(Self {
            config,
            samples,
            costs,
            rollups,
            schedules,
            pricer,
        })
    }

    /// Append one validated sample
    pub fn append(&self, sample: MetricSample) -> Result<ChunkRef> {
        self.samples.append(sample)
    }

    /// Append a batch; stops at the first rejected sample
    pub fn append_batch(&self, batch: SampleBatch) -> Result<usize> {
        let mut appended = 0;
        for sample in batch.samples {
            self.samples.append(sample)?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Raw samples in `[start, end)`, time-ascending, optionally
    /// filtered and capped
    pub fn query_raw(
        &self,
        device_id: Option<&str>,
        metric_type: Option<&str>,
        start: i64,
        end: i64,
        limit: Option<usize>,
    ) -> Result<Vec<MetricSample>> {
        let mut rows = self.samples.query(device_id, metric_type, start, end)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Rollup rows over raw metrics in `[start, end)` by bucket start
    pub fn query_rollup(
        &self,
        width: BucketWidth,
        device_id: Option<&str>,
        metric_type: Option<&str>,
        start: i64,
        end: i64,
    ) -> Vec<RollupRow> {
        self.rollups
            .query(RollupSource::Metrics, width, device_id, metric_type, start, end)
    }

    /// Rollup rows over cost totals in `[start, end)` by bucket start
    pub fn query_cost_rollup(
        &self,
        width: BucketWidth,
        device_id: Option<&str>,
        start: i64,
        end: i64,
    ) -> Vec<RollupRow> {
        self.rollups
            .query(RollupSource::Costs, width, device_id, None, start, end)
    }

    /// Cost records for a device in `[start, end)`, time-ascending
    pub fn query_cost(&self, device_id: &str, start: i64, end: i64) -> Result<Vec<CostRecord>> {
        self.costs.query(Some(device_id), None, start, end)
    }

    /// Price a window on demand and persist the record
    pub fn price_window(&self, device_id: &str, start: i64, end: i64) -> Result<CostRecord> {
        self.pricer.price_window(device_id, start, end)
    }

    /// Add a rate schedule, or replace a not-yet-effective version.
    /// Schedules are immutable once effective.
    pub fn upsert_schedule(&self, schedule: RateSchedule) -> Result<()> {
        if schedule.periods.is_empty() {
            return Err(WattlineError::Config(format!(
                "rate schedule {} has no periods",
                schedule.rate_id
            )));
        }
        if let Some(expiry) = schedule.expiry_date {
            if expiry <= schedule.effective_date {
                return Err(WattlineError::Config(format!(
                    "rate schedule {} expires before it takes effect",
                    schedule.rate_id
                )));
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut schedules = self.schedules.write();
        if let Some(existing) = schedules.iter().position(|s| s.rate_id == schedule.rate_id) {
            if schedules[existing].effective_date <= now {
                return Err(WattlineError::Config(format!(
                    "rate schedule {} is already effective and cannot be replaced",
                    schedule.rate_id
                )));
            }
            schedules[existing] = schedule;
        } else {
            info!(rate_id = %schedule.rate_id, provider = %schedule.provider, "Rate schedule added");
            schedules.push(schedule);
        }
        Ok(())
    }

    /// Snapshot of the schedule catalog
    pub fn schedules(&self) -> Vec<RateSchedule> {
        self.schedules.read().clone()
    }

    /// Cascade delete: remove a device's samples, cost records, and
    /// rollup rows. Returns total rows removed.
    pub fn remove_device(&self, device_id: &str) -> Result<usize> {
        let mut removed = self.samples.delete_device(device_id)?;
        removed += self.costs.delete_device(device_id)?;
        removed += self.rollups.delete_device(device_id);
        Ok(removed)
    }

    /// Rollup finalization boundary for a table, if any refresh ran
    pub fn rollup_watermark(&self, source: RollupSource, width: BucketWidth) -> Option<i64> {
        self.rollups.watermark(source, width)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CoreStats {
        CoreStats {
            samples: self.samples.stats(),
            costs: self.costs.stats(),
            schedules: self.schedules.read().len(),
        }
    }

    /// Spawn the lifecycle loops over this store
    pub fn start_lifecycle(self: &Arc<Self>, config: LifecycleConfig) -> LifecycleScheduler {
        LifecycleScheduler::start(self.clone(), config)
    }

    /// Compression pass: columnar-encode aged open chunks in both
    /// chunked tables. Keeps going past a failed table; the first
    /// failure still surfaces so the scheduler counts it.
    pub fn run_compression_pass(&self, now: i64) -> Result<usize> {
        let mut compressed = 0;
        let mut failed = None;

        match self.samples.compress(self.config.compress_after_ms, now) {
            Ok(count) => compressed += count,
            Err(e) => {
                warn!(table = "metrics", error = %e, "Compression failed");
                failed = Some(e);
            }
        }
        match self.costs.compress(self.config.compress_after_ms, now) {
            Ok(count) => compressed += count,
            Err(e) => {
                warn!(table = "costs", error = %e, "Compression failed");
                failed = Some(e);
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(compressed),
        }
    }

    /// Refresh pass: advance all four rollup tables
    pub fn run_refresh_pass(&self, now: i64) -> Result<usize> {
        let mut rows = 0;
        let mut failed = None;

        let targets = [
            (RollupSource::Metrics, BucketWidth::Hourly, self.config.hourly_watermark_lag_ms),
            (RollupSource::Metrics, BucketWidth::Daily, self.config.daily_watermark_lag_ms),
            (RollupSource::Costs, BucketWidth::Hourly, self.config.hourly_watermark_lag_ms),
            (RollupSource::Costs, BucketWidth::Daily, self.config.daily_watermark_lag_ms),
        ];
        for (source, width, lag) in targets {
            match self.rollups.refresh(source, width, lag, now) {
                Ok(outcome) => rows += outcome.rows,
                Err(e) => {
                    warn!(
                        source = source.as_str(),
                        width = width.as_str(),
                        error = %e,
                        "Rollup refresh failed"
                    );
                    failed = Some(e);
                }
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(rows),
        }
    }

    /// Retention pass: expire chunks past their horizons (never ahead
    /// of the rollup watermark) and rollup rows past theirs
    pub fn run_retention_pass(&self, now: i64) -> Result<usize> {
        let mut removed = 0;
        let mut failed = None;

        let safe_raw = self.rollups.safe_expiry_bound(RollupSource::Metrics);
        match self.samples.expire(self.config.raw_retention_ms, now, safe_raw) {
            Ok(count) => removed += count,
            Err(e) => {
                warn!(table = "metrics", error = %e, "Retention refused or failed");
                failed = Some(e);
            }
        }

        let safe_cost = self.rollups.safe_expiry_bound(RollupSource::Costs);
        match self.costs.expire(self.config.cost_retention_ms, now, safe_cost) {
            Ok(count) => removed += count,
            Err(e) => {
                warn!(table = "costs", error = %e, "Retention refused or failed");
                failed = Some(e);
            }
        }

        removed += self.rollups.expire(self.config.rollup_retention_ms, now);

        match failed {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
