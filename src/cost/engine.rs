//! Cost engine
//!
//! Converts a window of power samples into a priced cost record:
//! - Energy by trapezoidal integration over successive sample pairs,
//!   so irregular sampling intervals are handled correctly
//! - One tariff lookup per sub-interval of constant period; windows
//!   spanning a rate transition are split at the boundary and summed
//! - Demand charge from window peak power when configured
//! - Carbon from the configured grid intensity
//!
//! Re-pricing the same window is deterministic and upserts by
//! `(device_id, period_start, period_end)`.

use super::CostRecord;
use crate::chunk::ChunkStore;
use crate::config::CoreConfig;
use crate::error::{Result, WattlineError};
use crate::sample::MetricSample;
use crate::tariff::{RateSchedule, ResolvedRate, TariffResolver};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

const MS_PER_HOUR_F: f64 = 3_600_000.0;

/// Metric type priced by the engine
const POWER_METRIC: &str = "power";

/// Prices metric windows against the active rate schedule
pub struct CostEngine {
    samples: Arc<ChunkStore<MetricSample>>,
    costs: Arc<ChunkStore<CostRecord>>,
    schedules: Arc<RwLock<Vec<RateSchedule>>>,
    demand_rate_per_kw: Option<f64>,
    tax_rate: f64,
    grid_carbon_intensity: f64,
}

impl CostEngine {
    /// Create a cost engine over the sample and cost stores
    pub fn new(
        samples: Arc<ChunkStore<MetricSample>>,
        costs: Arc<ChunkStore<CostRecord>>,
        schedules: Arc<RwLock<Vec<RateSchedule>>>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            samples,
            costs,
            schedules,
            demand_rate_per_kw: config.demand_rate_per_kw,
            tax_rate: config.tax_rate,
            grid_carbon_intensity: config.grid_carbon_intensity,
        }
    }

    /// Price the power consumption of one device over `[start, end)`
    /// and persist the resulting record
    pub fn price_window(&self, device_id: &str, start: i64, end: i64) -> Result<CostRecord> {
        if start >= end {
            return Err(WattlineError::InvalidWindow(format!(
                "window start {start} is not before end {end}"
            )));
        }

        let samples = self
            .samples
            .query(Some(device_id), Some(POWER_METRIC), start, end)?;
        if samples.is_empty() {
            return Err(WattlineError::InvalidWindow(format!(
                "no power samples for device {device_id} in [{start}, {end})"
            )));
        }

        // Piecewise-linear power curve over the full window: samples
        // joined linearly, held flat out to the window edges.
        let mut curve: Vec<(i64, f64)> = Vec::with_capacity(samples.len() + 2);
        if samples[0].time > start {
            curve.push((start, samples[0].value));
        }
        curve.extend(samples.iter().map(|s| (s.time, s.value)));
        if samples[samples.len() - 1].time < end {
            curve.push((end, samples[samples.len() - 1].value));
        }

        // Split at every instant the resolved period can change and
        // price each sub-interval independently.
        let mut priced: Vec<(ResolvedRate, f64)> = Vec::new();
        let schedules = self.schedules.read();
        let mut cursor = start;
        while cursor < end {
            let schedule = TariffResolver::select_active(&schedules, cursor).ok_or_else(|| {
                WattlineError::NoMatchingPeriod {
                    rate_id: "<no active schedule>".to_string(),
                    timestamp: cursor,
                }
            })?;
            let rate = TariffResolver::resolve(schedule, cursor)?;

            // The period can also change when this schedule expires or a
            // newer one becomes effective mid-window.
            let mut boundary = TariffResolver::next_boundary(schedule, cursor).min(end);
            if let Some(expiry) = schedule.expiry_date {
                if expiry > cursor {
                    boundary = boundary.min(expiry);
                }
            }
            for other in schedules.iter() {
                if other.effective_date > cursor {
                    boundary = boundary.min(other.effective_date);
                }
            }

            let energy_wh = trapezoid_wh(&curve, cursor, boundary);
            match priced
                .iter_mut()
                .find(|(r, _)| r.rate_id == rate.rate_id && r.period_name == rate.period_name)
            {
                Some((_, wh)) => *wh += energy_wh,
                None => priced.push((rate, energy_wh)),
            }
            cursor = boundary;
        }
        drop(schedules);

        let energy_wh: f64 = priced.iter().map(|(_, wh)| wh).sum();
        let energy_kwh = energy_wh / 1000.0;
        let cost_energy: f64 = priced
            .iter()
            .map(|(rate, wh)| wh / 1000.0 * rate.rate_per_kwh)
            .sum();

        let peak_power_w = samples
            .iter()
            .map(|s| s.value)
            .fold(f64::NEG_INFINITY, f64::max);
        let hours = (end - start) as f64 / MS_PER_HOUR_F;
        let avg_power_w = energy_wh / hours;

        let cost_demand = self
            .demand_rate_per_kw
            .map(|rate| rate * peak_power_w / 1000.0)
            .unwrap_or(0.0);
        let cost_taxes = self.tax_rate * (cost_energy + cost_demand);
        let cost_total = cost_energy + cost_demand + cost_taxes;

        // Provenance: the period that contributed the most energy,
        // first-declared on ties. At least one sub-interval was priced
        // since the window is non-empty.
        let mut dominant_idx = 0;
        for (i, (_, wh)) in priced.iter().enumerate().skip(1) {
            if *wh > priced[dominant_idx].1 {
                dominant_idx = i;
            }
        }
        let dominant = priced[dominant_idx].0.clone();

        let record = CostRecord {
            time: start,
            device_id: device_id.to_string(),
            period_start: start,
            period_end: end,
            energy_kwh,
            avg_power_w,
            peak_power_w,
            cost_total,
            cost_energy,
            cost_demand,
            cost_taxes,
            rate_id: dominant.rate_id,
            rate_period: dominant.period_name,
            rate_per_kwh: dominant.rate_per_kwh,
            carbon_co2_kg: energy_kwh * self.grid_carbon_intensity,
        };

        let (dev, ps, pe) = (device_id.to_string(), start, end);
        self.costs.replace_where(record.clone(), move |r| {
            r.device_id == dev && r.period_start == ps && r.period_end == pe
        })?;

        debug!(
            device_id,
            period_start = start,
            period_end = end,
            energy_kwh,
            cost_total,
            "Priced window"
        );
        Ok(record)
    }
}

/// Integrate a piecewise-linear power curve over `[from, to]`,
/// returning watt-hours. Segment values at the cut points are linearly
/// interpolated so sub-interval energies sum exactly to the whole.
fn trapezoid_wh(curve: &[(i64, f64)], from: i64, to: i64) -> f64 {
    let mut wh = 0.0;
    for pair in curve.windows(2) {
        let (t0, v0) = pair[0];
        let (t1, v1) = pair[1];
        if t1 <= from || t0 >= to || t1 == t0 {
            continue;
        }
        let a = t0.max(from);
        let b = t1.min(to);
        if b <= a {
            continue;
        }
        let span = (t1 - t0) as f64;
        let va = v0 + (v1 - v0) * ((a - t0) as f64 / span);
        let vb = v0 + (v1 - v0) * ((b - t0) as f64 / span);
        wh += (va + vb) / 2.0 * (b - a) as f64 / MS_PER_HOUR_F;
    }
    wh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MS_PER_DAY, MS_PER_HOUR};
    use crate::tariff::{RatePeriod, ScheduleDay};
    use chrono::{NaiveTime, TimeZone, Utc};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc_ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn tou_schedule() -> RateSchedule {
        RateSchedule::new("tou-1", "acme", 0)
            .with_period(
                RatePeriod::new("peak", 0.42)
                    .with_days(ScheduleDay::weekdays())
                    .with_time_range(t(16, 0), t(21, 0)),
            )
            .with_period(RatePeriod::new("off_peak", 0.24))
    }

    fn engine_with(schedule: RateSchedule, config: CoreConfig) -> CostEngine {
        let samples = Arc::new(ChunkStore::new("metrics", 7 * MS_PER_DAY, false));
        let costs = Arc::new(ChunkStore::new("costs", 7 * MS_PER_DAY, false));
        let schedules = Arc::new(RwLock::new(vec![schedule]));
        CostEngine::new(samples, costs, schedules, &config)
    }

    fn ingest_constant(engine: &CostEngine, device: &str, start: i64, end: i64, watts: f64) {
        let step = 5 * 60 * 1000;
        let mut time = start;
        while time < end {
            engine
                .samples
                .append(MetricSample::new(device, "power", time, watts, "watts"))
                .unwrap();
            time += step;
        }
    }

    #[test]
    fn test_constant_load_peak_hour() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        // Wednesday 18:00-19:00, constant 1000 W
        let start = utc_ms(2024, 1, 17, 18, 0);
        let end = utc_ms(2024, 1, 17, 19, 0);
        ingest_constant(&engine, "d1", start, end, 1000.0);

        let record = engine.price_window("d1", start, end).unwrap();

        assert!((record.energy_kwh - 1.0).abs() < 1e-9);
        assert!((record.cost_total - 0.42).abs() < 1e-9);
        assert_eq!(record.rate_period, "peak");
        assert_eq!(record.rate_per_kwh, 0.42);
        assert_eq!(record.cost_demand, 0.0);
        assert_eq!(record.cost_taxes, 0.0);
        assert!((record.avg_power_w - 1000.0).abs() < 1e-6);
        assert_eq!(record.peak_power_w, 1000.0);
    }

    #[test]
    fn test_window_split_at_rate_boundary() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        // Wednesday 20:30-21:30 spans the 21:00 peak end
        let start = utc_ms(2024, 1, 17, 20, 30);
        let end = utc_ms(2024, 1, 17, 21, 30);
        ingest_constant(&engine, "d1", start, end, 1000.0);

        let record = engine.price_window("d1", start, end).unwrap();

        // 0.5 h peak (0.21) + 0.5 h off-peak (0.12)
        assert!((record.cost_total - 0.33).abs() < 1e-9);
        assert!((record.energy_kwh - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_trapezoid_day_integration() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        // 288 samples over 24 h at 5-minute spacing, 200 W +/- 50 W
        let start = utc_ms(2024, 1, 15, 0, 0);
        let end = start + MS_PER_DAY;
        for i in 0..288 {
            let watts = if i % 2 == 0 { 150.0 } else { 250.0 };
            engine
                .samples
                .append(MetricSample::new(
                    "d1",
                    "power",
                    start + i * 5 * 60 * 1000,
                    watts,
                    "watts",
                ))
                .unwrap();
        }

        let record = engine.price_window("d1", start, end).unwrap();
        assert!((record.energy_kwh - 4.8).abs() < 0.48);
        assert_eq!(record.peak_power_w, 250.0);
    }

    #[test]
    fn test_price_window_idempotent() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        let start = utc_ms(2024, 1, 17, 18, 0);
        let end = utc_ms(2024, 1, 17, 19, 0);
        ingest_constant(&engine, "d1", start, end, 730.0);

        let first = engine.price_window("d1", start, end).unwrap();
        let second = engine.price_window("d1", start, end).unwrap();

        assert_eq!(first, second);
        // Upsert, not duplicate
        let stored = engine.costs.query(Some("d1"), None, 0, end + 1).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], first);
    }

    #[test]
    fn test_demand_and_tax_components() {
        let config = CoreConfig::default()
            .with_demand_rate(10.0)
            .with_tax_rate(0.10)
            .with_carbon_intensity(0.5);
        let engine = engine_with(tou_schedule(), config);

        let start = utc_ms(2024, 1, 17, 18, 0);
        let end = utc_ms(2024, 1, 17, 19, 0);
        ingest_constant(&engine, "d1", start, end, 1000.0);

        let record = engine.price_window("d1", start, end).unwrap();

        // demand: 10.0 per kW * 1 kW peak
        assert!((record.cost_demand - 10.0).abs() < 1e-9);
        // taxes: 10% of (0.42 + 10.0)
        assert!((record.cost_taxes - 1.042).abs() < 1e-9);
        assert!(
            (record.cost_total - (record.cost_energy + record.cost_demand + record.cost_taxes))
                .abs()
                < 1e-12
        );
        assert!((record.carbon_co2_kg - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_irregular_sampling() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        let start = utc_ms(2024, 1, 17, 18, 0);
        let end = start + MS_PER_HOUR;

        // 100 W for the first half, 300 W for the second, with uneven gaps
        engine
            .samples
            .append(MetricSample::new("d1", "power", start, 100.0, "watts"))
            .unwrap();
        engine
            .samples
            .append(MetricSample::new(
                "d1",
                "power",
                start + 30 * 60 * 1000,
                100.0,
                "watts",
            ))
            .unwrap();
        engine
            .samples
            .append(MetricSample::new(
                "d1",
                "power",
                start + 30 * 60 * 1000 + 1,
                300.0,
                "watts",
            ))
            .unwrap();
        engine
            .samples
            .append(MetricSample::new(
                "d1",
                "power",
                end - 1,
                300.0,
                "watts",
            ))
            .unwrap();

        let record = engine.price_window("d1", start, end).unwrap();
        // ~0.5 h at 100 W + ~0.5 h at 300 W = ~0.2 kWh
        assert!((record.energy_kwh - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_empty_window_rejected() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        let err = engine.price_window("d1", 0, MS_PER_HOUR).unwrap_err();
        assert!(matches!(err, WattlineError::InvalidWindow(_)));

        let err = engine.price_window("d1", 100, 100).unwrap_err();
        assert!(matches!(err, WattlineError::InvalidWindow(_)));
    }

    #[test]
    fn test_no_active_schedule_surfaces() {
        let future = RateSchedule::new("later", "acme", i64::MAX - 1);
        let engine = engine_with(future, CoreConfig::default());
        let start = utc_ms(2024, 1, 17, 18, 0);
        ingest_constant(&engine, "d1", start, start + MS_PER_HOUR, 100.0);

        let err = engine
            .price_window("d1", start, start + MS_PER_HOUR)
            .unwrap_err();
        assert!(matches!(err, WattlineError::NoMatchingPeriod { .. }));
    }

    #[test]
    fn test_dominant_period_provenance() {
        let engine = engine_with(tou_schedule(), CoreConfig::default());
        // Wednesday 20:00-23:00: 1 h peak, 2 h off-peak
        let start = utc_ms(2024, 1, 17, 20, 0);
        let end = utc_ms(2024, 1, 17, 23, 0);
        ingest_constant(&engine, "d1", start, end, 1000.0);

        let record = engine.price_window("d1", start, end).unwrap();
        assert_eq!(record.rate_period, "off_peak");
        // 1 kWh at 0.42 + 2 kWh at 0.24
        assert!((record.cost_total - 0.90).abs() < 1e-9);
    }
}
