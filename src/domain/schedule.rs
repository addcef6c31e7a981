//! Five-field cron expressions: validation and next fire time.
//!
//! Supports `*`, numbers, ranges (`a-b`), steps (`*/n`, `a-b/n`, `a/n`)
//! and comma lists. Day-of-week accepts `0-7` with both `0` and `7`
//! meaning Sunday. When both day-of-month and day-of-week are restricted a
//! day matches if either does, as in classic cron.

use chrono::{DateTime, Datelike, Days, Duration, NaiveTime, TimeZone, Timelike, Utc};

use crate::error::BackupError;

/// Days scanned forward before giving up on a schedule that never fires
/// (e.g. `0 0 31 2 *`).
const SEARCH_HORIZON_DAYS: u64 = 366 * 5;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parses a five-field expression.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] if the field count is wrong or
    /// any field is out of range.
    pub fn parse(expr: &str) -> Result<Self, BackupError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(BackupError::InvalidConfig(format!(
                "schedule must have 5 fields, got {}: {expr:?}",
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, 0, 7)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            minutes: parse_field(minute, 0, 59)?,
            hours: parse_field(hour, 0, 23)?,
            days_of_month: parse_field(dom, 1, 31)?,
            months: parse_field(month, 1, 12)?,
            days_of_week,
            dom_restricted: *dom != "*",
            dow_restricted: *dow != "*",
        })
    }

    /// Returns the first fire time strictly after `after`, or `None` if the
    /// expression cannot fire within five years.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            .checked_add_signed(Duration::minutes(1))?;
        let start_date = start.date_naive();

        for offset in 0..SEARCH_HORIZON_DAYS {
            let date = start_date.checked_add_days(Days::new(offset))?;
            if !self.matches_day(date.month(), date.day(), date.weekday().num_days_from_sunday()) {
                continue;
            }
            let first_day = offset == 0;
            let hour_from = if first_day { start.hour() } else { 0 };
            for hour in hour_from..24 {
                if !bit(self.hours, hour) {
                    continue;
                }
                let minute_from = if first_day && hour == start.hour() {
                    start.minute()
                } else {
                    0
                };
                if let Some(minute) = (minute_from..60).find(|m| bit(self.minutes, *m)) {
                    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                    return Some(Utc.from_utc_datetime(&date.and_time(time)));
                }
            }
        }
        None
    }

    fn matches_day(&self, month: u32, day: u32, weekday: u32) -> bool {
        if !bit(self.months, month) {
            return false;
        }
        let dom = bit(self.days_of_month, day);
        let dow = bit(self.days_of_week, weekday);
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1u64 << value) != 0
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, BackupError> {
    let invalid = || BackupError::InvalidConfig(format!("invalid cron field {field:?}"));
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                lo.parse().map_err(|_| invalid())?,
                hi.parse().map_err(|_| invalid())?,
            )
        } else {
            let value: u32 = range.parse().map_err(|_| invalid())?;
            // `a/n` means "from a to the end of the range, every n".
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        let mut value = lo;
        while value <= hi {
            mask |= 1u64 << value;
            value += step;
        }
    }
    Ok(mask)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        let Ok(parsed) = DateTime::parse_from_rfc3339(s) else {
            panic!("bad fixture timestamp");
        };
        parsed.with_timezone(&Utc)
    }

    fn schedule(expr: &str) -> CronSchedule {
        let Ok(parsed) = CronSchedule::parse(expr) else {
            panic!("expected {expr:?} to parse");
        };
        parsed
    }

    #[test]
    fn daily_at_two() {
        let s = schedule("0 2 * * *");
        assert_eq!(
            s.next_after(at("2026-10-19T01:30:00Z")),
            Some(at("2026-10-19T02:00:00Z"))
        );
        assert_eq!(
            s.next_after(at("2026-10-19T02:00:00Z")),
            Some(at("2026-10-20T02:00:00Z"))
        );
    }

    #[test]
    fn every_six_hours() {
        let s = schedule("0 */6 * * *");
        assert_eq!(
            s.next_after(at("2026-10-19T06:10:00Z")),
            Some(at("2026-10-19T12:00:00Z"))
        );
        assert_eq!(
            s.next_after(at("2026-10-19T23:59:59Z")),
            Some(at("2026-10-20T00:00:00Z"))
        );
    }

    #[test]
    fn lists_and_ranges() {
        let s = schedule("15,45 9-17/4 * * 1-5");
        // 2026-10-17 is a Saturday.
        assert_eq!(
            s.next_after(at("2026-10-17T10:00:00Z")),
            Some(at("2026-10-19T09:15:00Z"))
        );
        assert_eq!(
            s.next_after(at("2026-10-19T09:15:00Z")),
            Some(at("2026-10-19T09:45:00Z"))
        );
        assert_eq!(
            s.next_after(at("2026-10-19T09:45:00Z")),
            Some(at("2026-10-19T13:15:00Z"))
        );
    }

    #[test]
    fn sunday_as_seven() {
        let s = schedule("0 0 * * 7");
        assert_eq!(
            s.next_after(at("2026-10-19T00:00:00Z")),
            Some(at("2026-10-25T00:00:00Z"))
        );
    }

    #[test]
    fn dom_or_dow_when_both_restricted() {
        let s = schedule("0 0 1 * 1");
        // Next Monday (10-26) comes before the 1st of November.
        assert_eq!(
            s.next_after(at("2026-10-20T00:00:00Z")),
            Some(at("2026-10-26T00:00:00Z"))
        );
    }

    #[test]
    fn impossible_date_never_fires() {
        let s = schedule("0 0 31 2 *");
        assert_eq!(s.next_after(at("2026-01-01T00:00:00Z")), None);
    }

    #[test]
    fn rejects_malformed() {
        for expr in ["", "0 2 * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "a b c d e", "5-1 * * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "{expr:?} should be rejected");
        }
    }
}
