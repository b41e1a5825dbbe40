#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Wattline
//!
//! Wattline is the storage and billing core of an energy monitoring
//! system. It ingests continuous power/energy readings from
//! heterogeneous devices and owns everything between ingestion and the
//! query surface:
//!
//! - **Chunked storage**: raw readings partitioned into fixed-width
//!   time chunks with an `Open -> Compressed -> Expired` lifecycle and
//!   columnar encoding of aged chunks
//! - **Statistical rollups**: incrementally-maintained hourly and
//!   daily summaries (count, avg, min, max, sum, percentiles, stddev)
//!   over raw readings and computed costs
//! - **Tariff resolution**: time-of-use rate schedules matched by
//!   schedule-local day-of-week and time-of-day
//! - **Cost attribution**: trapezoidal energy integration, rate-period
//!   splitting, demand charges, taxes, and carbon impact
//! - **Lifecycle scheduling**: compression, refresh, and retention on
//!   independent recurring cadences
//!
//! REST endpoints, authentication, device discovery, and polling live
//! outside this crate; validated samples and schedule definitions come
//! in, ordered readings, rollups, and cost records go out.
//!
//! ## Library Usage
//!
//! ```no_run
//! use wattline::{CoreConfig, EnergyStore, MetricSample, Result};
//!
//! fn main() -> Result<()> {
//!     let store = EnergyStore::new(CoreConfig::default())?;
//!     store.append(MetricSample::new("plug-1", "power", 1_700_000_000_000, 125.5, "watts"))?;
//!     let rows = store.query_raw(Some("plug-1"), Some("power"), 0, i64::MAX, None)?;
//!     println!("{} readings", rows.len());
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod config;
pub mod cost;
pub mod error;
pub mod lifecycle;
pub mod rollup;
pub mod sample;
pub mod store;
pub mod tariff;

pub use chunk::{ChunkRef, ChunkState, ChunkStore};
pub use config::CoreConfig;
pub use cost::{CostEngine, CostRecord};
pub use error::{Result, WattlineError};
pub use lifecycle::{LifecycleConfig, LifecycleScheduler, SchedulerStats};
pub use rollup::{BucketWidth, RollupEngine, RollupRow, RollupSource};
pub use sample::{MetricSample, SampleBatch};
pub use store::{CoreStats, EnergyStore};
pub use tariff::{RatePeriod, RateSchedule, ResolvedRate, ScheduleDay, TariffResolver};
