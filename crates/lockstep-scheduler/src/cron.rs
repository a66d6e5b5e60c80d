//! Six-field cron expressions: `second minute hour day-of-month month
//! day-of-week`.
//!
//! Fields accept `*`, `?`, single values, `a-b` ranges, `a,b,c` lists and
//! `*/n`, `a/n`, `a-b/n` steps. Months and weekdays also take three-letter
//! names (`JAN`, `MON`). Day-of-week runs 0–7 with both 0 and 7 meaning
//! Sunday. Day-of-month and day-of-week must both match.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};

use crate::error::{Result, SchedulerError};

/// Upper bound on field rollovers per search. Impossible dates such as
/// `31 6` (June 31st) exhaust it and yield `None`.
const MAX_ROLLOVERS: usize = 4096;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of `names[0]`.
    names_base: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], names_base: 0 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DAY_OF_MONTH: FieldSpec =
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec =
    FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES, names_base: 1 };
const DAY_OF_WEEK: FieldSpec =
    FieldSpec { name: "day-of-week", min: 0, max: 7, names: DAY_NAMES, names_base: 0 };

/// Parsed cron pattern. Equality and hashing use the source text.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
}

impl CronExpression {
    pub fn parse(pattern: &str) -> Result<Self> {
        let source = pattern.trim();
        if source.is_empty() {
            return Err(invalid(pattern, "expression is empty"));
        }

        let expanded = expand_macro(source).unwrap_or(source);
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(invalid(
                pattern,
                &format!("expected 6 fields, found {}", fields.len()),
            ));
        }

        let mut days_of_week = parse_field(pattern, fields[5], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: source.to_string(),
            seconds: parse_field(pattern, fields[0], &SECOND)?,
            minutes: parse_field(pattern, fields[1], &MINUTE)?,
            hours: parse_field(pattern, fields[2], &HOUR)?,
            days_of_month: parse_field(pattern, fields[3], &DAY_OF_MONTH)?,
            months: parse_field(pattern, fields[4], &MONTH)?,
            days_of_week,
        })
    }

    /// The pattern as written, macros unexpanded.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First matching instant strictly after `after`, or `None` if the
    /// pattern can never match again.
    ///
    /// Fields are checked from month down to second. When a field does not
    /// match it is rolled forward to its next allowed value (carrying into the
    /// next larger field when none is left), every smaller field is reset to
    /// its minimum and the check restarts.
    pub fn next(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = after.with_nanosecond(0)? + Duration::seconds(1);

        for _ in 0..MAX_ROLLOVERS {
            if !has(self.months, t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            match next_set(self.hours, t.hour(), HOUR.max) {
                Some(h) if h == t.hour() => {}
                Some(h) => {
                    t = t.date().and_hms_opt(h, 0, 0)?;
                    continue;
                }
                None => {
                    t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                    continue;
                }
            }
            match next_set(self.minutes, t.minute(), MINUTE.max) {
                Some(m) if m == t.minute() => {}
                Some(m) => {
                    t = t.date().and_hms_opt(t.hour(), m, 0)?;
                    continue;
                }
                None => {
                    t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                    continue;
                }
            }
            match next_set(self.seconds, t.second(), SECOND.max) {
                Some(s) if s == t.second() => return Some(t),
                Some(s) => return t.date().and_hms_opt(t.hour(), t.minute(), s),
                None => {
                    t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                }
            }
        }
        None
    }

    /// [`next`](Self::next) in the wall-clock time of `after`'s zone.
    /// Local times skipped by a DST gap are passed over.
    pub fn next_in<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut naive = after.naive_local();
        for _ in 0..4 {
            naive = self.next(naive)?;
            if let Some(at) = tz.from_local_datetime(&naive).earliest() {
                if at > *after {
                    return Some(at);
                }
            }
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        has(self.days_of_month, date.day()) && has(self.days_of_week, date.weekday().num_days_from_sunday())
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl Hash for CronExpression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for CronExpression {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn expand_macro(source: &str) -> Option<&'static str> {
    let expanded = match source.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        "@monthly" => "0 0 0 1 * *",
        "@weekly" => "0 0 0 * * 0",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@hourly" => "0 0 * * * *",
        _ => return None,
    };
    Some(expanded)
}

fn invalid(pattern: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidCron {
        expression: pattern.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse one field into a bit set of allowed values.
fn parse_field(pattern: &str, field: &str, spec: &FieldSpec) -> Result<u64> {
    let mut bits = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(pattern, &format!("bad step '{step}' in {}", spec.name)))?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = match range {
            "*" | "?" => (spec.min, spec.max),
            _ => match range.split_once('-') {
                Some((a, b)) => (value(pattern, a, spec)?, value(pattern, b, spec)?),
                None => {
                    let v = value(pattern, range, spec)?;
                    // `a/n` runs from `a` to the end of the field.
                    (v, if step.is_some() { spec.max } else { v })
                }
            },
        };
        if start > end {
            return Err(invalid(
                pattern,
                &format!("range {start}-{end} is reversed in {}", spec.name),
            ));
        }

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            bits |= 1 << v;
        }
    }
    Ok(bits)
}

fn value(pattern: &str, token: &str, spec: &FieldSpec) -> Result<u32> {
    let upper = token.to_ascii_uppercase();
    let parsed = match spec.names.iter().position(|n| *n == upper) {
        Some(i) => Some(i as u32 + spec.names_base),
        None => token.parse::<u32>().ok(),
    };
    parsed
        .filter(|v| (spec.min..=spec.max).contains(v))
        .ok_or_else(|| {
            invalid(
                pattern,
                &format!("'{token}' is not a valid {} ({}-{})", spec.name, spec.min, spec.max),
            )
        })
}

fn has(bits: u64, v: u32) -> bool {
    bits & (1 << v) != 0
}

/// Smallest allowed value `>= from`, if any up to `max`.
fn next_set(bits: u64, from: u32, max: u32) -> Option<u32> {
    (from..=max).find(|v| has(bits, *v))
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn next(pattern: &str, from: &str) -> Option<NaiveDateTime> {
        CronExpression::parse(pattern).unwrap().next(at(from))
    }

    #[test]
    fn hour_rollover_crosses_day() {
        assert_eq!(
            next("0 0 * * * *", "2024-11-29T23:00:00"),
            Some(at("2024-11-30T00:00:00"))
        );
    }

    #[test]
    fn result_is_strictly_after_input() {
        assert_eq!(
            next("*/15 * * * * *", "2024-01-01T10:00:15"),
            Some(at("2024-01-01T10:00:30"))
        );
        assert_eq!(
            next("0 30 9 * * *", "2024-01-01T09:30:00"),
            Some(at("2024-01-02T09:30:00"))
        );
    }

    #[test]
    fn leap_day_skips_common_years() {
        assert_eq!(
            next("0 0 0 29 2 *", "2024-02-29T00:00:00"),
            Some(at("2028-02-29T00:00:00"))
        );
    }

    #[test]
    fn impossible_date_returns_none() {
        assert_eq!(next("0 0 0 31 6 *", "2024-01-01T00:00:00"), None);
        assert_eq!(next("0 0 0 31 6 *", "1999-06-30T12:00:00"), None);
        assert_eq!(next("0 0 0 30 2 *", "2024-01-01T00:00:00"), None);
    }

    #[test]
    fn lists_ranges_and_steps() {
        // 10:00, 10:20, 10:40 on weekdays only.
        let expr = "0 0/20 10 * * MON-FRI";
        // 2024-03-08 is a Friday.
        assert_eq!(next(expr, "2024-03-08T10:40:00"), Some(at("2024-03-11T10:00:00")));
        assert_eq!(next(expr, "2024-03-11T10:05:00"), Some(at("2024-03-11T10:20:00")));

        assert_eq!(
            next("0 0 8-18/5 * * *", "2024-03-08T09:00:00"),
            Some(at("2024-03-08T13:00:00"))
        );
        assert_eq!(
            next("0 0 0 1,15 * *", "2024-03-02T00:00:00"),
            Some(at("2024-03-15T00:00:00"))
        );
    }

    #[test]
    fn month_and_day_names() {
        assert_eq!(
            next("0 0 12 * dec sun", "2024-01-01T00:00:00"),
            Some(at("2024-12-01T12:00:00"))
        );
        // 7 is Sunday as well.
        assert_eq!(
            next("0 0 12 * 12 7", "2024-01-01T00:00:00"),
            Some(at("2024-12-01T12:00:00"))
        );
    }

    #[test]
    fn day_of_month_and_week_both_apply() {
        // Friday the 13th.
        assert_eq!(
            next("0 0 0 13 * FRI", "2024-01-01T00:00:00"),
            Some(at("2024-09-13T00:00:00"))
        );
    }

    #[test]
    fn year_end_rollover() {
        assert_eq!(
            next("0 0 0 1 1 *", "2024-12-31T23:59:59"),
            Some(at("2025-01-01T00:00:00"))
        );
        assert_eq!(
            next("59 59 23 31 12 *", "2024-12-31T23:59:58"),
            Some(at("2024-12-31T23:59:59"))
        );
    }

    #[test]
    fn macros_expand_but_keep_source() {
        let daily = CronExpression::parse("@daily").unwrap();
        assert_eq!(daily.to_string(), "@daily");
        assert_eq!(daily.next(at("2024-05-05T13:00:00")), Some(at("2024-05-06T00:00:00")));

        let weekly = CronExpression::parse("@weekly").unwrap();
        // 2024-05-05 is a Sunday.
        assert_eq!(weekly.next(at("2024-05-05T00:00:00")), Some(at("2024-05-12T00:00:00")));

        assert_eq!(
            CronExpression::parse("@hourly").unwrap().next(at("2024-05-05T13:10:00")),
            Some(at("2024-05-05T14:00:00"))
        );
        assert_eq!(
            CronExpression::parse("@annually").unwrap().next(at("2024-05-05T13:10:00")),
            Some(at("2025-01-01T00:00:00"))
        );
    }

    #[test]
    fn equality_follows_source_text() {
        let a: CronExpression = "0 0 0 * * *".parse().unwrap();
        let b: CronExpression = "0 0 0 * * *".parse().unwrap();
        let daily: CronExpression = "@daily".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, daily);
    }

    #[test]
    fn rejects_malformed_patterns() {
        for bad in [
            "",
            "   ",
            "* * * * *",
            "* * * * * * *",
            "60 * * * * *",
            "* * 24 * * *",
            "* * * 0 * *",
            "* * * * 13 *",
            "* * * * * 8",
            "*/0 * * * * *",
            "5-1 * * * * *",
            "* * * * FOO *",
            "@often",
        ] {
            assert!(CronExpression::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn next_in_time_zone() {
        use chrono::Utc;
        let expr = CronExpression::parse("0 0 6 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let next = expr.next_in(&from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap());
    }
}
