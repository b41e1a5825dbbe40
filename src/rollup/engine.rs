//! Rollup engine
//!
//! Maintains the four rollup tables (metrics hourly/daily, cost
//! hourly/daily) incrementally. A refresh scans only the delta window
//! between the last watermark and `now - watermark_lag`; the lag keeps
//! the most recent bucket out of scope until no more in-order writes
//! are expected into it. Re-running a refresh over an already-finalized
//! window recomputes the same rows.

use super::stats::BucketStats;
use super::{BucketWidth, RollupKey, RollupRow};
use crate::chunk::ChunkStore;
use crate::cost::{CostRecord, COST_METRIC};
use crate::error::Result;
use crate::sample::MetricSample;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Which chunked table a rollup summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RollupSource {
    /// Raw metric samples
    Metrics,
    /// Computed cost records (aggregated over `cost_total`)
    Costs,
}

impl RollupSource {
    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupSource::Metrics => "metrics",
            RollupSource::Costs => "costs",
        }
    }
}

/// Result of one refresh pass
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOutcome {
    /// Distinct buckets recomputed
    pub buckets: usize,
    /// Rollup rows written
    pub rows: usize,
    /// Watermark after the pass, if any refresh has ever completed
    pub watermark: Option<i64>,
}

struct RollupTable {
    rows: RwLock<BTreeMap<RollupKey, RollupRow>>,
    /// Bucket-aligned finalization boundary; `i64::MIN` until the first
    /// successful refresh.
    watermark: AtomicI64,
}

impl RollupTable {
    fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            watermark: AtomicI64::new(i64::MIN),
        }
    }
}

/// Incremental rollup maintenance over the sample and cost stores
pub struct RollupEngine {
    samples: Arc<ChunkStore<MetricSample>>,
    costs: Arc<ChunkStore<CostRecord>>,
    metrics_hourly: RollupTable,
    metrics_daily: RollupTable,
    cost_hourly: RollupTable,
    cost_daily: RollupTable,
}

impl RollupEngine {
    /// Create a rollup engine over the two chunked tables
    pub fn new(samples: Arc<ChunkStore<MetricSample>>, costs: Arc<ChunkStore<CostRecord>>) -> Self {
        Self {
            samples,
            costs,
            metrics_hourly: RollupTable::new(),
            metrics_daily: RollupTable::new(),
            cost_hourly: RollupTable::new(),
            cost_daily: RollupTable::new(),
        }
    }

    fn table(&self, source: RollupSource, width: BucketWidth) -> &RollupTable {
        match (source, width) {
            (RollupSource::Metrics, BucketWidth::Hourly) => &self.metrics_hourly,
            (RollupSource::Metrics, BucketWidth::Daily) => &self.metrics_daily,
            (RollupSource::Costs, BucketWidth::Hourly) => &self.cost_hourly,
            (RollupSource::Costs, BucketWidth::Daily) => &self.cost_daily,
        }
    }

    /// Finalization boundary for one table, if a refresh has completed
    pub fn watermark(&self, source: RollupSource, width: BucketWidth) -> Option<i64> {
        let wm = self.table(source, width).watermark.load(Ordering::Acquire);
        (wm != i64::MIN).then_some(wm)
    }

    /// Oldest boundary below which both bucket widths of a source are
    /// finalized. Retention for the source's raw chunks must not pass
    /// this.
    pub fn safe_expiry_bound(&self, source: RollupSource) -> i64 {
        let hourly = self
            .table(source, BucketWidth::Hourly)
            .watermark
            .load(Ordering::Acquire);
        let daily = self
            .table(source, BucketWidth::Daily)
            .watermark
            .load(Ordering::Acquire);
        hourly.min(daily)
    }

    /// Recompute all buckets between the last watermark and
    /// `now - watermark_lag`, scanning only that delta window
    pub fn refresh(
        &self,
        source: RollupSource,
        width: BucketWidth,
        watermark_lag_ms: i64,
        now: i64,
    ) -> Result<RefreshOutcome> {
        let table = self.table(source, width);
        let window_end = width.bucket_start(now - watermark_lag_ms);

        let from = match table.watermark.load(Ordering::Acquire) {
            i64::MIN => {
                let earliest = match source {
                    RollupSource::Metrics => self.samples.earliest_chunk_start(),
                    RollupSource::Costs => self.costs.earliest_chunk_start(),
                };
                match earliest {
                    Some(start) => width.bucket_start(start),
                    // Nothing ingested yet: nothing to finalize
                    None => return Ok(RefreshOutcome::default()),
                }
            }
            wm => wm,
        };

        if from >= window_end {
            return Ok(RefreshOutcome {
                buckets: 0,
                rows: 0,
                watermark: self.watermark(source, width),
            });
        }

        // Scan the delta window only, never the full history.
        let tuples: Vec<(i64, String, String, f64)> = match source {
            RollupSource::Metrics => self
                .samples
                .query(None, None, from, window_end)?
                .into_iter()
                .map(|s| (s.time, s.device_id, s.metric_type, s.value))
                .collect(),
            RollupSource::Costs => self
                .costs
                .query(None, None, from, window_end)?
                .into_iter()
                .map(|c| (c.time, c.device_id, COST_METRIC.to_string(), c.cost_total))
                .collect(),
        };

        let mut grouped: BTreeMap<RollupKey, Vec<f64>> = BTreeMap::new();
        for (time, device_id, metric_type, value) in tuples {
            let key = RollupKey {
                bucket_start: width.bucket_start(time),
                device_id,
                metric_type,
            };
            grouped.entry(key).or_default().push(value);
        }

        let mut computed: Vec<(RollupKey, RollupRow)> = Vec::with_capacity(grouped.len());
        let mut buckets = std::collections::BTreeSet::new();
        for (key, values) in grouped {
            if let Some(stats) = BucketStats::from_values(&values) {
                buckets.insert(key.bucket_start);
                let row = RollupRow {
                    bucket_start: key.bucket_start,
                    device_id: key.device_id.clone(),
                    metric_type: key.metric_type.clone(),
                    sample_count: stats.count,
                    avg: stats.avg,
                    min: stats.min,
                    max: stats.max,
                    sum: stats.sum,
                    p50: stats.p50,
                    p95: stats.p95,
                    p99: stats.p99,
                    stddev: stats.stddev,
                };
                computed.push((key, row));
            }
        }

        let rows_written = computed.len();
        {
            // Whole-window replacement under one write lock: readers see
            // either the previous rows or the recomputed set, never a mix.
            let mut rows = table.rows.write();
            rows.retain(|k, _| k.bucket_start < from || k.bucket_start >= window_end);
            for (key, row) in computed {
                rows.insert(key, row);
            }
        }
        table.watermark.store(window_end, Ordering::Release);

        if rows_written > 0 {
            info!(
                source = source.as_str(),
                width = width.as_str(),
                rows = rows_written,
                watermark = window_end,
                "Rollup refresh complete"
            );
        } else {
            debug!(
                source = source.as_str(),
                width = width.as_str(),
                watermark = window_end,
                "Rollup refresh found no rows"
            );
        }

        Ok(RefreshOutcome {
            buckets: buckets.len(),
            rows: rows_written,
            watermark: Some(window_end),
        })
    }

    /// Query rollup rows in `[start, end)` by bucket start, optionally
    /// filtered, ordered by (bucket, device, metric)
    pub fn query(
        &self,
        source: RollupSource,
        width: BucketWidth,
        device_id: Option<&str>,
        metric_type: Option<&str>,
        start: i64,
        end: i64,
    ) -> Vec<RollupRow> {
        let lower = RollupKey {
            bucket_start: start,
            device_id: String::new(),
            metric_type: String::new(),
        };
        let upper = RollupKey {
            bucket_start: end,
            device_id: String::new(),
            metric_type: String::new(),
        };

        let rows = self.table(source, width).rows.read();
        rows.range(lower..upper)
            .filter(|(k, _)| {
                device_id.map_or(true, |d| k.device_id == d)
                    && metric_type.map_or(true, |m| k.metric_type == m)
            })
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Delete rollup rows whose bucket ended before `now - retain_ms`.
    /// Rollups outlive raw data, so this horizon is the longer one.
    pub fn expire(&self, retain_ms: i64, now: i64) -> usize {
        let cutoff = now - retain_ms;
        let mut removed = 0;

        for source in [RollupSource::Metrics, RollupSource::Costs] {
            for width in [BucketWidth::Hourly, BucketWidth::Daily] {
                let table = self.table(source, width);
                let mut rows = table.rows.write();
                let before = rows.len();
                rows.retain(|k, _| k.bucket_start + width.duration_ms() > cutoff);
                removed += before - rows.len();
            }
        }

        if removed > 0 {
            info!(rows = removed, "Expired rollup rows");
        }
        removed
    }

    /// Remove every rollup row belonging to a device
    pub fn delete_device(&self, device_id: &str) -> usize {
        let mut removed = 0;
        for source in [RollupSource::Metrics, RollupSource::Costs] {
            for width in [BucketWidth::Hourly, BucketWidth::Daily] {
                let mut rows = self.table(source, width).rows.write();
                let before = rows.len();
                rows.retain(|k, _| k.device_id != device_id);
                removed += before - rows.len();
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MS_PER_DAY, MS_PER_HOUR};

    fn engine() -> RollupEngine {
        let samples = Arc::new(ChunkStore::new("metrics", 7 * MS_PER_DAY, false));
        let costs = Arc::new(ChunkStore::new("costs", 7 * MS_PER_DAY, false));
        RollupEngine::new(samples, costs)
    }

    fn ingest_hour(engine: &RollupEngine, device: &str, hour_start: i64, values: &[f64]) {
        let step = MS_PER_HOUR / values.len() as i64;
        for (i, v) in values.iter().enumerate() {
            engine
                .samples
                .append(MetricSample::new(
                    device,
                    "power",
                    hour_start + i as i64 * step,
                    *v,
                    "watts",
                ))
                .unwrap();
        }
    }

    #[test]
    fn test_refresh_finalizes_closed_buckets() {
        let engine = engine();
        ingest_hour(&engine, "d1", 0, &[100.0, 200.0, 300.0]);
        ingest_hour(&engine, "d1", MS_PER_HOUR, &[50.0]);

        // Now is 2h + lag margin; both hour buckets are closed
        let now = 3 * MS_PER_HOUR;
        let outcome = engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, MS_PER_HOUR / 2, now)
            .unwrap();

        assert_eq!(outcome.buckets, 2);
        assert_eq!(outcome.watermark, Some(2 * MS_PER_HOUR));

        let rows = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            Some("d1"),
            Some("power"),
            0,
            MS_PER_DAY,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sample_count, 3);
        assert_eq!(rows[0].avg, 200.0);
        assert_eq!(rows[0].min, 100.0);
        assert_eq!(rows[0].max, 300.0);
        assert_eq!(rows[0].sum, 600.0);
        assert_eq!(rows[1].sample_count, 1);
    }

    #[test]
    fn test_watermark_lag_excludes_recent_bucket() {
        let engine = engine();
        ingest_hour(&engine, "d1", 0, &[100.0]);
        ingest_hour(&engine, "d1", MS_PER_HOUR, &[200.0]);

        // Second bucket closed only 10 minutes ago; lag is 15 minutes
        let now = 2 * MS_PER_HOUR + 10 * 60 * 1000;
        let outcome = engine
            .refresh(
                RollupSource::Metrics,
                BucketWidth::Hourly,
                15 * 60 * 1000,
                now,
            )
            .unwrap();

        assert_eq!(outcome.watermark, Some(MS_PER_HOUR));
        let rows = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            None,
            None,
            0,
            MS_PER_DAY,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_start, 0);
    }

    #[test]
    fn test_refresh_scans_delta_only_and_is_idempotent() {
        let engine = engine();
        ingest_hour(&engine, "d1", 0, &[100.0, 300.0]);

        let now = 2 * MS_PER_HOUR;
        let first = engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, now)
            .unwrap();
        assert_eq!(first.rows, 1);
        let rows_before = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            None,
            None,
            0,
            MS_PER_DAY,
        );

        // Re-run with no new data: watermark already caught up, no work
        let second = engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, now)
            .unwrap();
        assert_eq!(second.rows, 0);
        let rows_after = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            None,
            None,
            0,
            MS_PER_DAY,
        );
        assert_eq!(rows_before, rows_after);
    }

    #[test]
    fn test_sample_count_matches_raw() {
        let engine = engine();
        for i in 0..60 {
            engine
                .samples
                .append(MetricSample::new(
                    "d1",
                    "power",
                    i * 60 * 1000,
                    i as f64,
                    "watts",
                ))
                .unwrap();
        }

        let now = 2 * MS_PER_HOUR;
        engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, now)
            .unwrap();

        let raw = engine.samples.query(Some("d1"), Some("power"), 0, MS_PER_HOUR).unwrap();
        let rows = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            Some("d1"),
            Some("power"),
            0,
            MS_PER_HOUR,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sample_count as usize, raw.len());
    }

    #[test]
    fn test_cost_rollup_source() {
        let engine = engine();
        let record = CostRecord {
            time: 1000,
            device_id: "d1".to_string(),
            period_start: 1000,
            period_end: 2000,
            energy_kwh: 1.0,
            avg_power_w: 1000.0,
            peak_power_w: 1000.0,
            cost_total: 0.42,
            cost_energy: 0.42,
            cost_demand: 0.0,
            cost_taxes: 0.0,
            rate_id: "r".to_string(),
            rate_period: "peak".to_string(),
            rate_per_kwh: 0.42,
            carbon_co2_kg: 0.4,
        };
        engine.costs.append(record).unwrap();

        engine
            .refresh(RollupSource::Costs, BucketWidth::Hourly, 0, 2 * MS_PER_HOUR)
            .unwrap();

        let rows = engine.query(
            RollupSource::Costs,
            BucketWidth::Hourly,
            Some("d1"),
            None,
            0,
            MS_PER_DAY,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric_type, COST_METRIC);
        assert_eq!(rows[0].sum, 0.42);
    }

    #[test]
    fn test_rollup_expiry() {
        let engine = engine();
        ingest_hour(&engine, "d1", 0, &[1.0]);
        engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, 2 * MS_PER_HOUR)
            .unwrap();

        // Not yet past the horizon
        assert_eq!(engine.expire(MS_PER_DAY, MS_PER_DAY), 0);
        // Past it
        assert_eq!(engine.expire(MS_PER_DAY, 2 * MS_PER_DAY + MS_PER_HOUR), 1);
    }

    #[test]
    fn test_delete_device_rollups() {
        let engine = engine();
        ingest_hour(&engine, "gone", 0, &[1.0]);
        ingest_hour(&engine, "kept", 0, &[2.0]);
        engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, 2 * MS_PER_HOUR)
            .unwrap();

        assert_eq!(engine.delete_device("gone"), 1);
        let rows = engine.query(
            RollupSource::Metrics,
            BucketWidth::Hourly,
            None,
            None,
            0,
            MS_PER_DAY,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, "kept");
    }

    #[test]
    fn test_safe_expiry_bound_tracks_slowest_width() {
        let engine = engine();
        ingest_hour(&engine, "d1", 0, &[1.0]);

        assert_eq!(engine.safe_expiry_bound(RollupSource::Metrics), i64::MIN);

        engine
            .refresh(RollupSource::Metrics, BucketWidth::Hourly, 0, 3 * MS_PER_HOUR)
            .unwrap();
        // Daily has not refreshed yet; bound stays at MIN
        assert_eq!(engine.safe_expiry_bound(RollupSource::Metrics), i64::MIN);

        engine
            .refresh(RollupSource::Metrics, BucketWidth::Daily, 0, 2 * MS_PER_DAY)
            .unwrap();
        assert_eq!(
            engine.safe_expiry_bound(RollupSource::Metrics),
            3 * MS_PER_HOUR
        );
    }
}
