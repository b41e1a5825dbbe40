//! Time-of-use rate schedules
//!
//! A rate schedule is a priced, time-conditional billing policy: named
//! periods (peak, off-peak, ...) matched by local day-of-week and
//! time-of-day. Schedules are versioned and immutable once effective;
//! at most one is active at any instant, selection by effective date.

pub mod resolver;

pub use resolver::{ResolvedRate, TariffResolver};

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Day of week a rate period applies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl ScheduleDay {
    /// All seven days
    pub fn all() -> Vec<ScheduleDay> {
        vec![
            ScheduleDay::Monday,
            ScheduleDay::Tuesday,
            ScheduleDay::Wednesday,
            ScheduleDay::Thursday,
            ScheduleDay::Friday,
            ScheduleDay::Saturday,
            ScheduleDay::Sunday,
        ]
    }

    /// Monday through Friday
    pub fn weekdays() -> Vec<ScheduleDay> {
        vec![
            ScheduleDay::Monday,
            ScheduleDay::Tuesday,
            ScheduleDay::Wednesday,
            ScheduleDay::Thursday,
            ScheduleDay::Friday,
        ]
    }

    /// Saturday and Sunday
    pub fn weekends() -> Vec<ScheduleDay> {
        vec![ScheduleDay::Saturday, ScheduleDay::Sunday]
    }

    /// Convert from a chrono weekday
    pub fn from_weekday(day: Weekday) -> Self {
        match day {
            Weekday::Mon => ScheduleDay::Monday,
            Weekday::Tue => ScheduleDay::Tuesday,
            Weekday::Wed => ScheduleDay::Wednesday,
            Weekday::Thu => ScheduleDay::Thursday,
            Weekday::Fri => ScheduleDay::Friday,
            Weekday::Sat => ScheduleDay::Saturday,
            Weekday::Sun => ScheduleDay::Sunday,
        }
    }
}

/// One named, priced period within a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePeriod {
    /// Period name (e.g. "peak", "off_peak")
    pub name: String,
    /// Price per kWh
    pub rate_per_kwh: f64,
    /// Days the period applies on
    pub applicable_days: Vec<ScheduleDay>,
    /// Local start time (inclusive)
    pub start_time: NaiveTime,
    /// Local end time (exclusive); `end <= start` wraps past midnight,
    /// `end == start` covers the whole day
    pub end_time: NaiveTime,
}

impl RatePeriod {
    /// Create a period covering all days, all hours
    pub fn new(name: &str, rate_per_kwh: f64) -> Self {
        Self {
            name: name.to_string(),
            rate_per_kwh,
            applicable_days: ScheduleDay::all(),
            start_time: NaiveTime::MIN,
            end_time: NaiveTime::MIN,
        }
    }

    /// Restrict to specific days
    pub fn with_days(mut self, days: Vec<ScheduleDay>) -> Self {
        self.applicable_days = days;
        self
    }

    /// Restrict to a local time-of-day range, end exclusive
    pub fn with_time_range(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Check whether a localized instant falls in this period
    pub fn matches_local(&self, day: ScheduleDay, time: NaiveTime) -> bool {
        if !self.applicable_days.contains(&day) {
            return false;
        }
        if self.start_time == self.end_time {
            // Full-day range
            return true;
        }
        if self.start_time < self.end_time {
            time >= self.start_time && time < self.end_time
        } else {
            // Wraparound crossing midnight: split into two sub-ranges
            time >= self.start_time || time < self.end_time
        }
    }
}

/// A versioned time-of-use rate schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSchedule {
    /// Schedule identifier
    pub rate_id: String,
    /// Utility provider
    pub provider: String,
    /// Activation timestamp (inclusive), milliseconds
    pub effective_date: i64,
    /// Deactivation timestamp (exclusive), if bounded
    pub expiry_date: Option<i64>,
    /// Billing currency code
    pub currency: String,
    /// Schedule-local UTC offset in minutes; all period matching
    /// happens in this offset, not UTC
    pub utc_offset_minutes: i32,
    /// Periods in declaration order; the first match wins, so more
    /// specific periods must precede catch-all ones
    pub periods: Vec<RatePeriod>,
}

impl RateSchedule {
    /// Create a new schedule
    pub fn new(rate_id: &str, provider: &str, effective_date: i64) -> Self {
        Self {
            rate_id: rate_id.to_string(),
            provider: provider.to_string(),
            effective_date,
            expiry_date: None,
            currency: "USD".to_string(),
            utc_offset_minutes: 0,
            periods: Vec::new(),
        }
    }

    /// Set expiry
    pub fn with_expiry(mut self, expiry_date: i64) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    /// Set currency
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    /// Set the schedule-local UTC offset in minutes
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Append a period; declaration order is the tie-break rule
    pub fn with_period(mut self, period: RatePeriod) -> Self {
        self.periods.push(period);
        self
    }

    /// Check whether the schedule is active at an instant
    pub fn is_active_at(&self, time: i64) -> bool {
        time >= self.effective_date && self.expiry_date.map_or(true, |exp| time < exp)
    }
}
