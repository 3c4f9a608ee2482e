//! 5-field cron expressions compiled to bitmasks.
//!
//! `minute hour day-of-month month day-of-week`, one `u64` mask per field with
//! one bit per allowed value. Each field accepts `*`, single values,
//! comma-separated lists, `a-b` ranges and `*/n`, `a-b/n` or `a/n` steps.
//!
//! Day matching follows the traditional cron rule: when both day-of-month
//! and day-of-week are restricted (not `*`), a day matching either one is
//! enough; when only one is restricted, only that one counts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

/// How far ahead [`CronSchedule::next`] searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 4 * 365 + 1;

/// Fallback distance returned when nothing matches within the horizon.
const UNMATCHED_FALLBACK_DAYS: i64 = 365;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), found {found}")]
    FieldCount { found: usize },

    #[error("{field}: invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field}: value {value} outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field}: malformed range '{range}'")]
    InvalidRange { field: &'static str, range: String },

    #[error("{field}: step must be a positive integer, got '{step}'")]
    InvalidStep { field: &'static str, step: String },
}

// ---------------------------------------------------------------------------
// Field definitions
// ---------------------------------------------------------------------------

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 6 };

fn parse_number(text: &str, field: &FieldSpec) -> Result<u32, CronError> {
    text.parse::<u32>().map_err(|_| CronError::InvalidValue {
        field: field.name,
        value: text.to_string(),
    })
}

fn check_bounds(value: u32, field: &FieldSpec) -> Result<u32, CronError> {
    if value < field.min || value > field.max {
        return Err(CronError::OutOfRange {
            field: field.name,
            value,
            min: field.min,
            max: field.max,
        });
    }
    Ok(value)
}

/// Parse one comma-separated field into its bitmask.
fn parse_field(text: &str, field: &FieldSpec) -> Result<u64, CronError> {
    let mut bits = 0u64;

    for part in text.split(',') {
        if part.is_empty() {
            return Err(CronError::InvalidValue {
                field: field.name,
                value: text.to_string(),
            });
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step_text)) => {
                let step = step_text.parse::<u32>().ok().filter(|s| *s > 0).ok_or_else(|| {
                    CronError::InvalidStep {
                        field: field.name,
                        step: step_text.to_string(),
                    }
                })?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (field.min, field.max)
        } else if let Some((a, b)) = range.split_once('-') {
            if a.is_empty() || b.is_empty() {
                return Err(CronError::InvalidRange {
                    field: field.name,
                    range: range.to_string(),
                });
            }
            let lo = check_bounds(parse_number(a, field)?, field)?;
            let hi = check_bounds(parse_number(b, field)?, field)?;
            if lo > hi {
                return Err(CronError::InvalidRange {
                    field: field.name,
                    range: range.to_string(),
                });
            }
            (lo, hi)
        } else {
            let value = check_bounds(parse_number(range, field)?, field)?;
            match step {
                // `a/n` runs from `a` to the end of the field.
                Some(_) => (value, field.max),
                None => (value, value),
            }
        };

        let step = step.unwrap_or(1) as usize;
        for value in (lo..=hi).step_by(step) {
            bits |= 1u64 << value;
        }
    }

    Ok(bits)
}

// ---------------------------------------------------------------------------
// CronSchedule
// ---------------------------------------------------------------------------

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: u64,
    hour: u64,
    day_of_month: u64,
    month: u64,
    day_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
    source: String,
}

impl CronSchedule {
    /// Parse a 5-field cron expression.
    pub fn parse(spec: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = spec.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount { found: fields.len() });
        }

        Ok(Self {
            minute: parse_field(fields[0], &MINUTE)?,
            hour: parse_field(fields[1], &HOUR)?,
            day_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            month: parse_field(fields[3], &MONTH)?,
            day_of_week: parse_field(fields[4], &DAY_OF_WEEK)?,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
            source: fields.join(" "),
        })
    }

    /// The normalized expression text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the schedule fires in the minute containing `t`.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.month_matches(t) && self.day_matches(t) && self.hour_matches(t) && self.minute_matches(t)
    }

    /// First matching minute strictly after `from`.
    ///
    /// Searches at most four years ahead; a schedule that never matches in
    /// that window (e.g. `0 0 30 2 *`) yields `from + 1 year` instead.
    pub fn next(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = from + Duration::days(UNMATCHED_FALLBACK_DAYS);
        let horizon = from + Duration::days(SEARCH_HORIZON_DAYS);

        let Some(mut t) = truncate_to_minute(from).map(|t| t + Duration::minutes(1)) else {
            return fallback;
        };

        // Equivalent to a minute-by-minute scan: whole months, days and hours
        // that cannot match are skipped in one jump.
        while t <= horizon {
            let advanced = if !self.month_matches(t) {
                start_of_next_month(t)
            } else if !self.day_matches(t) {
                start_of_next_day(t)
            } else if !self.hour_matches(t) {
                start_of_next_hour(t)
            } else if !self.minute_matches(t) {
                Some(t + Duration::minutes(1))
            } else {
                return t;
            };

            match advanced {
                Some(next) => t = next,
                None => break,
            }
        }

        fallback
    }

    fn minute_matches(&self, t: DateTime<Utc>) -> bool {
        self.minute & (1u64 << t.minute()) != 0
    }

    fn hour_matches(&self, t: DateTime<Utc>) -> bool {
        self.hour & (1u64 << t.hour()) != 0
    }

    fn month_matches(&self, t: DateTime<Utc>) -> bool {
        self.month & (1u64 << t.month()) != 0
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.day_of_month & (1u64 << t.day()) != 0;
        let dow = self.day_of_week & (1u64 << t.weekday().num_days_from_sunday()) != 0;

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Calendar helpers
// ---------------------------------------------------------------------------

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    midnight(t.date_naive().succ_opt()?)
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    midnight(NaiveDate::from_ymd_opt(year, month, 1)?)
}

fn start_of_next_hour(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(truncate_to_minute(t)?.with_minute(0)? + Duration::hours(1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
