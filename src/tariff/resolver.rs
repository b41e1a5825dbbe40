//! Tariff resolution
//!
//! Pure lookup from a timestamp and rate-schedule definitions to the
//! applicable period and price. The resolver never guesses: a tariff
//! gap surfaces as an error and the caller decides the fallback.

use super::{RateSchedule, ScheduleDay};
use crate::config::MS_PER_DAY;
use crate::error::{Result, WattlineError};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a tariff lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRate {
    /// Schedule the rate came from
    pub rate_id: String,
    /// Matched period name
    pub period_name: String,
    /// Price per kWh
    pub rate_per_kwh: f64,
    /// Billing currency
    pub currency: String,
}

/// Stateless rate-schedule lookup
pub struct TariffResolver;

impl TariffResolver {
    /// Select the single active schedule for an instant: effective on
    /// or before it, not expired, most recent effective date wins on
    /// overlap
    pub fn select_active(schedules: &[RateSchedule], time: i64) -> Option<&RateSchedule> {
        schedules
            .iter()
            .filter(|s| s.is_active_at(time))
            .max_by_key(|s| s.effective_date)
    }

    /// Resolve the period applying at an instant. Periods are evaluated
    /// in declaration order and the first match wins; schedule authors
    /// place more specific periods before catch-all ones.
    pub fn resolve(schedule: &RateSchedule, time: i64) -> Result<ResolvedRate> {
        let (day, tod) = Self::localize(schedule, time);

        for period in &schedule.periods {
            if period.matches_local(day, tod) {
                return Ok(ResolvedRate {
                    rate_id: schedule.rate_id.clone(),
                    period_name: period.name.clone(),
                    rate_per_kwh: period.rate_per_kwh,
                    currency: schedule.currency.clone(),
                });
            }
        }

        Err(WattlineError::NoMatchingPeriod {
            rate_id: schedule.rate_id.clone(),
            timestamp: time,
        })
    }

    /// Next instant strictly after `time` at which the resolved period
    /// could change: a period edge or local midnight (day-of-week flip)
    pub fn next_boundary(schedule: &RateSchedule, time: i64) -> i64 {
        let offset_ms = schedule.utc_offset_minutes as i64 * 60_000;
        let local_ms_of_day = (time + offset_ms).rem_euclid(MS_PER_DAY);

        // Candidate times-of-day where matching can flip
        let mut candidates: Vec<i64> = vec![0];
        for period in &schedule.periods {
            candidates.push(period.start_time.num_seconds_from_midnight() as i64 * 1000);
            candidates.push(period.end_time.num_seconds_from_midnight() as i64 * 1000);
        }

        let min_delta = candidates
            .into_iter()
            .map(|cand| {
                let delta = cand - local_ms_of_day;
                if delta <= 0 {
                    delta + MS_PER_DAY
                } else {
                    delta
                }
            })
            .min()
            .unwrap_or(MS_PER_DAY);

        time + min_delta
    }

    /// Convert an instant to the schedule's local day and time-of-day.
    /// Conversion happens once per lookup; all matching is local.
    fn localize(schedule: &RateSchedule, time: i64) -> (ScheduleDay, chrono::NaiveTime) {
        let offset_ms = schedule.utc_offset_minutes as i64 * 60_000;
        let local = DateTime::<Utc>::from_timestamp_millis(time + offset_ms).unwrap_or_default();
        (
            ScheduleDay::from_weekday(local.weekday()),
            local.time(),
        )
    }
}
