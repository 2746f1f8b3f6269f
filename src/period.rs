//! Calendar periods and their UTC windows.
//!
//! Statistics are keyed by `(station, period, period_date)` where
//! `period_date` is always the first day of the window, so any anchor date
//! inside a week, month, quarter or year addresses the same row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Aggregation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    // ---
    pub const ALL: [Period; 5] = [
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Quarter,
        Period::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    /// Human adjective used in report titles.
    pub fn adjective(&self) -> &'static str {
        match self {
            Period::Day => "Daily",
            Period::Week => "Weekly",
            Period::Month => "Monthly",
            Period::Quarter => "Quarterly",
            Period::Year => "Annual",
        }
    }

    /// Window of this period kind that contains `anchor`.
    pub fn window(self, anchor: NaiveDate) -> Result<PeriodWindow> {
        // ---
        let start = match self {
            Period::Day => Some(anchor),
            Period::Week => anchor.checked_sub_days(Days::new(
                u64::from(anchor.weekday().num_days_from_monday()),
            )),
            Period::Month => anchor.with_day(1),
            Period::Quarter => {
                let first_month = (anchor.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(anchor.year(), first_month, 1)
            }
            Period::Year => NaiveDate::from_ymd_opt(anchor.year(), 1, 1),
        };
        let start = start.ok_or_else(|| out_of_range(self, anchor))?;

        let end = match self {
            Period::Day => start.checked_add_days(Days::new(1)),
            Period::Week => start.checked_add_days(Days::new(7)),
            Period::Month => start.checked_add_months(Months::new(1)),
            Period::Quarter => start.checked_add_months(Months::new(3)),
            Period::Year => start.checked_add_months(Months::new(12)),
        };
        let end = end.ok_or_else(|| out_of_range(self, anchor))?;

        Ok(PeriodWindow {
            period: self,
            start,
            end,
        })
    }
}

fn out_of_range(period: Period, anchor: NaiveDate) -> Error {
    Error::validation(format!("{} window around {} is out of range", period, anchor))
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown period kind '{s}'")))
    }
}

// ---

/// Half-open calendar window `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodWindow {
    // ---
    pub fn start_utc(&self) -> DateTime<Utc> {
        midnight(self.start)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        midnight(self.end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_utc() && ts < self.end_utc()
    }
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

// ---

/// Identifies one concrete calendar period, as callers name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeriodDescriptor {
    Day { date: NaiveDate },
    /// ISO 8601 year and week number.
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
    Year { year: i32 },
}

impl PeriodDescriptor {
    // ---
    pub fn period(&self) -> Period {
        match self {
            PeriodDescriptor::Day { .. } => Period::Day,
            PeriodDescriptor::Week { .. } => Period::Week,
            PeriodDescriptor::Month { .. } => Period::Month,
            PeriodDescriptor::Quarter { .. } => Period::Quarter,
            PeriodDescriptor::Year { .. } => Period::Year,
        }
    }

    /// First day of the described period; rejects out-of-domain components.
    pub fn anchor(&self) -> Result<NaiveDate> {
        // ---
        let date = match *self {
            PeriodDescriptor::Day { date } => Some(date),
            PeriodDescriptor::Week { year, week } => {
                NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            }
            PeriodDescriptor::Month { year, month } => NaiveDate::from_ymd_opt(year, month, 1),
            PeriodDescriptor::Quarter { year, quarter } if (1..=4).contains(&quarter) => {
                NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1)
            }
            PeriodDescriptor::Quarter { .. } => None,
            PeriodDescriptor::Year { year } => NaiveDate::from_ymd_opt(year, 1, 1),
        };
        date.ok_or_else(|| Error::validation(format!("invalid period descriptor: {}", self)))
    }

    pub fn window(&self) -> Result<PeriodWindow> {
        self.period().window(self.anchor()?)
    }
}

impl fmt::Display for PeriodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        match self {
            PeriodDescriptor::Day { date } => write!(f, "{}", date.format("%Y-%m-%d")),
            PeriodDescriptor::Week { year, week } => write!(f, "{year}-W{week:02}"),
            PeriodDescriptor::Month { year, month } => write!(f, "{year}-{month:02}"),
            PeriodDescriptor::Quarter { year, quarter } => write!(f, "{year}-Q{quarter}"),
            PeriodDescriptor::Year { year } => write!(f, "{year}"),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_window() {
        // ---
        let w = Period::Day.window(date(2024, 2, 29)).unwrap();
        assert_eq!(w.start, date(2024, 2, 29));
        assert_eq!(w.end, date(2024, 3, 1));
    }

    #[test]
    fn test_week_window_starts_on_iso_monday() {
        // ---
        // 2025-01-01 is a Wednesday in ISO week 2025-W01
        let w = Period::Week.window(date(2025, 1, 1)).unwrap();
        assert_eq!(w.start, date(2024, 12, 30));
        assert_eq!(w.end, date(2025, 1, 6));

        let from_descriptor = PeriodDescriptor::Week { year: 2025, week: 1 }.window().unwrap();
        assert_eq!(from_descriptor, w);
    }

    #[test]
    fn test_month_quarter_year_windows() {
        // ---
        let m = Period::Month.window(date(2024, 12, 17)).unwrap();
        assert_eq!((m.start, m.end), (date(2024, 12, 1), date(2025, 1, 1)));

        let q = Period::Quarter.window(date(2024, 8, 31)).unwrap();
        assert_eq!((q.start, q.end), (date(2024, 7, 1), date(2024, 10, 1)));

        let y = Period::Year.window(date(2024, 6, 15)).unwrap();
        assert_eq!((y.start, y.end), (date(2024, 1, 1), date(2025, 1, 1)));
    }

    #[test]
    fn test_window_contains_is_half_open() {
        // ---
        let w = Period::Day.window(date(2024, 5, 1)).unwrap();
        assert!(w.contains(midnight(date(2024, 5, 1))));
        assert!(!w.contains(midnight(date(2024, 5, 2))));
    }

    #[test]
    fn test_descriptor_validation() {
        // ---
        assert!(PeriodDescriptor::Month { year: 2024, month: 13 }.anchor().is_err());
        assert!(PeriodDescriptor::Quarter { year: 2024, quarter: 0 }.anchor().is_err());
        assert!(PeriodDescriptor::Quarter { year: 2024, quarter: 5 }.anchor().is_err());
        // 2021 has only 52 ISO weeks
        assert!(PeriodDescriptor::Week { year: 2021, week: 53 }.anchor().is_err());
        assert_eq!(
            PeriodDescriptor::Quarter { year: 2024, quarter: 4 }.anchor().unwrap(),
            date(2024, 10, 1)
        );
    }

    #[test]
    fn test_descriptor_json_and_label() {
        // ---
        let d: PeriodDescriptor =
            serde_json::from_str(r#"{"kind":"week","year":2024,"week":9}"#).unwrap();
        assert_eq!(d, PeriodDescriptor::Week { year: 2024, week: 9 });
        assert_eq!(d.to_string(), "2024-W09");
        assert_eq!(
            PeriodDescriptor::Day { date: date(2024, 3, 5) }.to_string(),
            "2024-03-05"
        );
        assert_eq!("quarter".parse::<Period>().unwrap(), Period::Quarter);
        assert!("fortnight".parse::<Period>().is_err());
    }
}
