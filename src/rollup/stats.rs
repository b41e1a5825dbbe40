//! Bucket statistics
//!
//! Aggregates computed per rollup bucket. Percentiles use linear
//! interpolation between the two nearest ranks; stddev is the
//! population form.

/// Aggregates over one bucket's values
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub stddev: f64,
}

impl BucketStats {
    /// Compute aggregates over a bucket's values; `None` when empty
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len() as u64;
        let sum: f64 = values.iter().sum();
        let avg = sum / count as f64;
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let variance =
            values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count as f64;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(Self {
            count,
            avg,
            min,
            max,
            sum,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            stddev: variance.sqrt(),
        })
    }
}

/// Continuous-distribution percentile over values sorted ascending:
/// interpolate linearly between the two nearest ranks at fraction `p`
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}
