//! Core configuration
//!
//! Settings for chunk layout, the compression/retention lifecycle,
//! rollup watermarks, and cost attribution. Supplied by the embedding
//! layer; everything has a workable default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Milliseconds in one hour
pub const MS_PER_HOUR: i64 = 60 * 60 * 1000;
/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory
    pub data_dir: PathBuf,
    /// Chunk interval width in milliseconds
    pub chunk_width_ms: i64,
    /// Accept writes into already-compressed chunks
    pub allow_late_writes: bool,
    /// Age after which an open chunk is eligible for compression
    pub compress_after_ms: i64,
    /// Retention horizon for raw samples
    pub raw_retention_ms: i64,
    /// Retention horizon for cost records
    pub cost_retention_ms: i64,
    /// Retention horizon for rollup rows (longer than raw)
    pub rollup_retention_ms: i64,
    /// Watermark lag before an hourly bucket is finalized
    pub hourly_watermark_lag_ms: i64,
    /// Watermark lag before a daily bucket is finalized
    pub daily_watermark_lag_ms: i64,
    /// Demand charge per kW of window peak power, if billed
    pub demand_rate_per_kw: Option<f64>,
    /// Tax fraction applied to the energy + demand subtotal
    pub tax_rate: f64,
    /// Grid carbon intensity in kg CO2 per kWh
    pub grid_carbon_intensity: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./wattline_data"),
            chunk_width_ms: 7 * MS_PER_DAY,
            allow_late_writes: false,
            compress_after_ms: MS_PER_DAY,
            raw_retention_ms: 90 * MS_PER_DAY,
            cost_retention_ms: 365 * MS_PER_DAY,
            rollup_retention_ms: 730 * MS_PER_DAY,
            hourly_watermark_lag_ms: 15 * 60 * 1000,
            daily_watermark_lag_ms: MS_PER_HOUR,
            demand_rate_per_kw: None,
            tax_rate: 0.0,
            grid_carbon_intensity: 0.4,
        }
    }
}

impl CoreConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set data directory
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Set chunk width in days
    pub fn with_chunk_width_days(mut self, days: i64) -> Self {
        self.chunk_width_ms = days * MS_PER_DAY;
        self
    }

    /// Set chunk width in milliseconds
    pub fn with_chunk_width_ms(mut self, width_ms: i64) -> Self {
        self.chunk_width_ms = width_ms;
        self
    }

    /// Allow or reject writes into compressed chunks
    pub fn with_allow_late_writes(mut self, allow: bool) -> Self {
        self.allow_late_writes = allow;
        self
    }

    /// Set the compression age threshold in days
    pub fn with_compress_after_days(mut self, days: i64) -> Self {
        self.compress_after_ms = days * MS_PER_DAY;
        self
    }

    /// Set raw retention in days
    pub fn with_raw_retention_days(mut self, days: i64) -> Self {
        self.raw_retention_ms = days * MS_PER_DAY;
        self
    }

    /// Set cost retention in days
    pub fn with_cost_retention_days(mut self, days: i64) -> Self {
        self.cost_retention_ms = days * MS_PER_DAY;
        self
    }

    /// Set rollup retention in days
    pub fn with_rollup_retention_days(mut self, days: i64) -> Self {
        self.rollup_retention_ms = days * MS_PER_DAY;
        self
    }

    /// Set a demand charge rate per kW
    pub fn with_demand_rate(mut self, rate_per_kw: f64) -> Self {
        self.demand_rate_per_kw = Some(rate_per_kw);
        self
    }

    /// Set the tax fraction
    pub fn with_tax_rate(mut self, rate: f64) -> Self {
        self.tax_rate = rate;
        self
    }

    /// Set the grid carbon intensity in kg CO2 per kWh
    pub fn with_carbon_intensity(mut self, kg_per_kwh: f64) -> Self {
        self.grid_carbon_intensity = kg_per_kwh;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.chunk_width_ms <= 0 {
            return Err(crate::error::WattlineError::Config(
                "chunk_width_ms must be positive".to_string(),
            ));
        }
        if self.raw_retention_ms <= 0 || self.cost_retention_ms <= 0 {
            return Err(crate::error::WattlineError::Config(
                "retention horizons must be positive".to_string(),
            ));
        }
        if self.rollup_retention_ms < self.raw_retention_ms {
            return Err(crate::error::WattlineError::Config(
                "rollup retention must not be shorter than raw retention".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.tax_rate) {
            return Err(crate::error::WattlineError::Config(
                "tax_rate must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}
