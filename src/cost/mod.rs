//! Cost attribution
//!
//! Priced cost records derived from metric windows and a rate schedule
//! snapshot. Records are recomputable: regenerating one for the same
//! input window produces identical values, and storage upserts by
//! `(device_id, period_start, period_end)` instead of duplicating.

pub mod engine;

pub use engine::CostEngine;

use crate::chunk::{ChunkRecord, SegmentKey};
use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Metric type tag cost rows carry in segment keys and rollups
pub const COST_METRIC: &str = "cost_total";

/// A priced window of consumption for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Record timestamp (equals `period_start`), milliseconds
    pub time: i64,
    /// Device the window belongs to
    pub device_id: String,
    /// Window start (inclusive), milliseconds
    pub period_start: i64,
    /// Window end (exclusive), milliseconds
    pub period_end: i64,
    /// Energy consumed over the window
    pub energy_kwh: f64,
    /// Average power over the window, watts
    pub avg_power_w: f64,
    /// Peak observed power within the window, watts
    pub peak_power_w: f64,
    /// Total cost: energy + demand + taxes
    pub cost_total: f64,
    /// Energy component
    pub cost_energy: f64,
    /// Demand-charge component
    pub cost_demand: f64,
    /// Tax component
    pub cost_taxes: f64,
    /// Rate schedule the pricing came from
    pub rate_id: String,
    /// Rate period that contributed the most energy
    pub rate_period: String,
    /// Per-kWh rate of that period
    pub rate_per_kwh: f64,
    /// Carbon emissions attributed to the window, kg CO2
    pub carbon_co2_kg: f64,
}

impl ChunkRecord for CostRecord {
    fn time(&self) -> i64 {
        self.time
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn metric_type(&self) -> &str {
        COST_METRIC
    }

    fn encode_segment(rows: &[Self]) -> Result<Bytes> {
        crate::chunk::columnar::encode_json_rows(rows)
    }

    fn decode_segment(_key: &SegmentKey, data: &[u8]) -> Result<Vec<Self>> {
        crate::chunk::columnar::decode_json_rows(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_record_roundtrip() {
        let record = CostRecord {
            time: 1000,
            device_id: "d1".to_string(),
            period_start: 1000,
            period_end: 2000,
            energy_kwh: 1.5,
            avg_power_w: 1500.0,
            peak_power_w: 2100.0,
            cost_total: 0.63,
            cost_energy: 0.63,
            cost_demand: 0.0,
            cost_taxes: 0.0,
            rate_id: "tou-1".to_string(),
            rate_period: "peak".to_string(),
            rate_per_kwh: 0.42,
            carbon_co2_kg: 0.6,
        };

        let encoded = CostRecord::encode_segment(std::slice::from_ref(&record)).unwrap();
        let decoded =
            CostRecord::decode_segment(&SegmentKey::new("d1", COST_METRIC), &encoded).unwrap();
        assert_eq!(decoded, vec![record]);
    }
}
