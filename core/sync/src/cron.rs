//! Five-field cron expressions.
//!
//! Fields are minute, hour, day of month, month and day of week. Each
//! accepts `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S` and comma-separated
//! lists of those. Months and weekdays also accept three-letter names,
//! and weekday 7 is Sunday.
//!
//! When both day fields are restricted, a day matches if either one does.

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike,
};
use std::fmt;
use std::str::FromStr;

use indexsync_common::{Error, Result};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Search horizon for `next_after`, in days.
const HORIZON_DAYS: i64 = 5 * 366;

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first entry in `names`.
    names_start: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_start: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_start: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
    names_start: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_start: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_start: 0,
};

impl FieldSpec {
    fn invalid(&self, field: &str, reason: impl fmt::Display) -> Error {
        Error::InvalidInput(format!(
            "invalid {} field '{}': {}",
            self.name, field, reason
        ))
    }

    fn value(&self, field: &str, text: &str) -> Result<u32> {
        let value = match text.parse::<u32>() {
            Ok(n) => n,
            Err(_) => self
                .names
                .iter()
                .position(|name| name.eq_ignore_ascii_case(text))
                .map(|i| i as u32 + self.names_start)
                .ok_or_else(|| self.invalid(field, format!("'{}' is not a value", text)))?,
        };

        if value < self.min || value > self.max {
            return Err(self.invalid(
                field,
                format!("{} is outside {}-{}", value, self.min, self.max),
            ));
        }
        Ok(value)
    }

    /// Parse a field; the flag is true when the field starts with `*`.
    fn parse(&self, field: &str) -> Result<(FieldSet, bool)> {
        let mut bits = 0u64;

        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| self.invalid(field, format!("bad step '{}'", step)))?;
                    if step == 0 {
                        return Err(self.invalid(field, "step must be positive"));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (self.value(field, a)?, self.value(field, b)?);
                if a > b {
                    return Err(self.invalid(field, format!("range {}-{} is reversed", a, b)));
                }
                (a, b)
            } else {
                let n = self.value(field, range)?;
                // `N/S` means "from N to the end, every S".
                (n, if step.is_some() { self.max } else { n })
            };

            for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
                bits |= 1 << value;
            }
        }

        Ok((FieldSet(bits), field.starts_with('*')))
    }
}

/// Parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    day_of_month_star: bool,
    day_of_week_star: bool,
}

impl CronSchedule {
    /// Parse a five-field expression.
    ///
    /// # Errors
    /// - `InvalidInput` for a wrong field count, out-of-range values,
    ///   reversed ranges or zero steps
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "cron expression '{}' must have 5 fields, found {}",
                expression,
                fields.len()
            )));
        };

        let (minutes, _) = MINUTE.parse(minute)?;
        let (hours, _) = HOUR.parse(hour)?;
        let (days_of_month, day_of_month_star) = DAY_OF_MONTH.parse(dom)?;
        let (months, _) = MONTH.parse(month)?;
        let (mut days_of_week, day_of_week_star) = DAY_OF_WEEK.parse(dow)?;

        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1 << 7));
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            day_of_month_star,
            day_of_week_star,
        })
    }

    /// The normalized expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        if self.day_of_month_star || self.day_of_week_star {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// Whether the schedule fires at the minute containing `time`.
    pub fn matches(&self, time: &NaiveDateTime) -> bool {
        self.months.contains(time.month())
            && self.day_matches(time.date())
            && self.hours.contains(time.hour())
            && self.minutes.contains(time.minute())
    }

    /// First fire time strictly after `after`, in the same time zone.
    ///
    /// Seconds are truncated. Local times that do not exist (DST gaps)
    /// are skipped; ambiguous ones fire at their earlier instant.
    /// Returns `None` if nothing fires within five years.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_second(0)?.with_nanosecond(0)?;
        let limit = start + TimeDelta::days(HORIZON_DAYS);
        let mut t = start + TimeDelta::minutes(1);

        while t <= limit {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1);
                continue;
            }

            if !self.minutes.contains(t.minute()) {
                t += TimeDelta::minutes(1);
                continue;
            }

            match tz.from_local_datetime(&t) {
                LocalResult::Single(fire) => return Some(fire),
                LocalResult::Ambiguous(earliest, _) => return Some(earliest),
                LocalResult::None => t += TimeDelta::minutes(1),
            }
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc, Weekday};
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        CronSchedule::parse(expr).unwrap().next_after(&from)
    }

    #[test]
    fn test_every_five_minutes() {
        assert_eq!(next("*/5 * * * *", at(2024, 1, 15, 10, 7)), Some(at(2024, 1, 15, 10, 10)));
        assert_eq!(next("*/5 * * * *", at(2024, 1, 15, 10, 10)), Some(at(2024, 1, 15, 10, 15)));
    }

    #[test]
    fn test_hour_rollover() {
        assert_eq!(next("*/15 * * * *", at(2024, 1, 15, 10, 50)), Some(at(2024, 1, 15, 11, 0)));
        assert_eq!(next("30 * * * *", at(2024, 1, 15, 10, 45)), Some(at(2024, 1, 15, 11, 30)));
    }

    #[test]
    fn test_day_month_and_year_rollover() {
        assert_eq!(next("0 0 * * *", at(2024, 1, 15, 23, 58)), Some(at(2024, 1, 16, 0, 0)));
        assert_eq!(next("0 6 1 * *", at(2024, 1, 31, 12, 0)), Some(at(2024, 2, 1, 6, 0)));
        assert_eq!(next("0 0 1 1 *", at(2024, 12, 31, 23, 59)), Some(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn test_seconds_are_truncated() {
        let from = Utc.with_ymd_and_hms(2024, 1, 15, 10, 9, 59).unwrap();
        assert_eq!(next("*/5 * * * *", from), Some(at(2024, 1, 15, 10, 10)));
    }

    #[test]
    fn test_weekday_range() {
        // 2024-01-19 is a Friday.
        let fire = next("0 9 * * MON-FRI", at(2024, 1, 19, 10, 0)).unwrap();
        assert_eq!(fire, at(2024, 1, 22, 9, 0));
        assert_eq!(fire.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_sunday_as_seven() {
        let zero = CronSchedule::parse("0 0 * * 0").unwrap();
        let seven = CronSchedule::parse("0 0 * * 7").unwrap();
        let from = at(2024, 1, 15, 0, 0);
        assert_eq!(zero.next_after(&from), seven.next_after(&from));
        assert_eq!(seven.next_after(&from), Some(at(2024, 1, 21, 0, 0)));
    }

    #[test]
    fn test_restricted_day_fields_are_ored() {
        // The 13th, or any Friday. 2024-01-15 is a Monday.
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        assert_eq!(schedule.next_after(&at(2024, 1, 15, 0, 0)), Some(at(2024, 1, 19, 0, 0)));
        assert_eq!(schedule.next_after(&at(2024, 2, 10, 0, 0)), Some(at(2024, 2, 13, 0, 0)));
    }

    #[test]
    fn test_starred_day_field_is_anded() {
        // Every other day of month, but only on Mondays.
        let schedule = CronSchedule::parse("0 0 */2 * 1").unwrap();
        let fire = schedule.next_after(&at(2024, 1, 1, 12, 0)).unwrap();
        assert_eq!(fire.weekday(), Weekday::Mon);
        assert_eq!(fire.day() % 2, 1);
    }

    #[test]
    fn test_lists_steps_and_names() {
        let schedule = CronSchedule::parse("0,30 8-18/2 * jan,JUL *").unwrap();
        assert_eq!(schedule.next_after(&at(2024, 1, 15, 9, 0)), Some(at(2024, 1, 15, 10, 0)));
        assert_eq!(schedule.next_after(&at(2024, 1, 31, 18, 30)), Some(at(2024, 7, 1, 8, 0)));
    }

    #[test]
    fn test_value_with_step_runs_to_end() {
        let schedule = CronSchedule::parse("50/5 * * * *").unwrap();
        assert_eq!(schedule.next_after(&at(2024, 1, 15, 10, 0)), Some(at(2024, 1, 15, 10, 50)));
        assert_eq!(schedule.next_after(&at(2024, 1, 15, 10, 55)), Some(at(2024, 1, 15, 11, 50)));
    }

    #[test]
    fn test_impossible_date_gives_none() {
        assert_eq!(next("0 0 30 2 *", at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(next("0 0 29 2 *", at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 0, 0)));
    }

    #[test]
    fn test_keeps_time_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let from = tz.with_ymd_and_hms(2024, 1, 15, 8, 59, 0).unwrap();
        let fire = CronSchedule::parse("0 9 * * *").unwrap().next_after(&from).unwrap();
        assert_eq!(fire, tz.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        for expr in [
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "abc * * * *",
            "* * * FOO *",
            "",
        ] {
            assert!(CronSchedule::parse(expr).is_err(), "{} should be rejected", expr);
        }
    }

    #[test]
    fn test_display_round_trip() {
        let schedule: CronSchedule = "  */5   *  * * *".parse().unwrap();
        assert_eq!(schedule.to_string(), "*/5 * * * *");
    }

    proptest! {
        #[test]
        fn prop_step_schedule_fires_within_the_hour(
            step in 1u32..60,
            offset in 0i64..(366 * 24 * 60),
        ) {
            let from = at(2024, 1, 1, 0, 0) + TimeDelta::minutes(offset);
            let schedule = CronSchedule::parse(&format!("*/{} * * * *", step)).unwrap();
            let fire = schedule.next_after(&from).unwrap();

            prop_assert!(fire > from);
            prop_assert!(fire - from <= TimeDelta::minutes(60));
            prop_assert_eq!(fire.minute() % step, 0);
            prop_assert!(schedule.matches(&fire.naive_utc()));
        }
    }
}
