//! Recurring report periods
//!
//! A period expression like `monthly`, `every 2 weeks` or
//! `weekly from 2020-01-01 to 2020-06-01` parses into a
//! [`ReportInterval`]: an optional recurring [`Period`] plus an
//! optional date range. The interval can place a date into its bucket
//! and enumerate the buckets spanning a date range; the interval report
//! stage is built on those two operations.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

/// A recurring period length
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    /// Every `n` days
    Daily(u32),
    /// Every `n` weeks
    Weekly(u32),
    /// Every `n` months
    Monthly(u32),
    /// Every `n` quarters
    Quarterly(u32),
    /// Every `n` years
    Yearly(u32),
}

impl Period {
    /// The date one period after `date`
    pub fn add_to(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily(n) => date + Duration::days(*n as i64),
            Period::Weekly(n) => date + Duration::weeks(*n as i64),
            Period::Monthly(n) => add_months(date, *n),
            Period::Quarterly(n) => add_months(date, n * 3),
            Period::Yearly(n) => add_months(date, n * 12),
        }
    }

    /// The natural bucket boundary on or before `date`: the day itself
    /// for daily periods, the start of the week/month/quarter/year
    /// otherwise
    pub fn natural_start(&self, date: NaiveDate, week_start: Weekday) -> NaiveDate {
        match self {
            Period::Daily(_) => date,
            Period::Weekly(_) => {
                let back = (date.weekday().num_days_from_sunday() + 7
                    - week_start.num_days_from_sunday())
                    % 7;
                date - Duration::days(back as i64)
            }
            Period::Monthly(_) => date.with_day(1).unwrap_or(date),
            Period::Quarterly(_) => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            Period::Yearly(_) => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let total = date.year() as i64 * 12 + date.month0() as i64 + months as i64;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// A recurring interval with an optional explicit range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportInterval {
    /// Recurring period; absent means the whole range is one bucket
    pub period: Option<Period>,
    /// Explicit range start; also anchors bucket boundaries
    pub start: Option<NaiveDate>,
    /// Explicit range end, exclusive
    pub end: Option<NaiveDate>,
}

impl ReportInterval {
    /// An interval from a bare period
    pub fn from_period(period: Period) -> Self {
        Self { period: Some(period), start: None, end: None }
    }

    /// An interval from an explicit range
    pub fn from_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self { period: None, start: Some(start), end: Some(end) }
    }

    /// Whether `date` falls inside the explicit range
    pub fn in_range(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date < e)
    }

    /// The `[start, end)` bucket containing `date`, or `None` when the
    /// date is outside the explicit range. Buckets anchor at the
    /// explicit start when one is given, at the period's natural
    /// boundary otherwise.
    pub fn bucket_of(&self, date: NaiveDate, week_start: Weekday) -> Option<(NaiveDate, NaiveDate)> {
        if !self.in_range(date) {
            return None;
        }
        match &self.period {
            None => {
                let start = self.start.unwrap_or(date);
                let end = self.end.unwrap_or(NaiveDate::MAX);
                Some((start, end))
            }
            Some(period) => {
                let mut start = match self.start {
                    Some(anchor) => anchor,
                    None => period.natural_start(date, week_start),
                };
                let mut end = period.add_to(start);
                while date >= end {
                    start = end;
                    end = period.add_to(end);
                    if end <= start {
                        return None;
                    }
                }
                Some((start, end))
            }
        }
    }

    /// Every bucket from the one containing `first` through the one
    /// containing `last`
    pub fn buckets(
        &self,
        first: NaiveDate,
        last: NaiveDate,
        week_start: Weekday,
    ) -> Vec<(NaiveDate, NaiveDate)> {
        let mut out = Vec::new();
        let Some((mut start, mut end)) = self.bucket_of(first, week_start) else {
            return out;
        };
        while start <= last {
            out.push((start, end));
            let Some(period) = &self.period else { break };
            start = end;
            end = period.add_to(end);
            if end <= start {
                break;
            }
        }
        out
    }
}

/// Errors from period parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    /// The expression shape was not recognized
    #[error("invalid period format: {0}")]
    InvalidFormat(String),
    /// A word was not a known period keyword
    #[error("unknown period keyword: {0}")]
    UnknownKeyword(String),
    /// A number in the expression was unusable
    #[error("invalid number in period: {0}")]
    InvalidNumber(String),
    /// A date in the expression was unusable
    #[error("invalid date in period: {0}")]
    InvalidDate(String),
    /// The expression held nothing at all
    #[error("missing period specification")]
    MissingPeriod,
}

/// Parse a period expression such as `monthly`, `every 2 weeks` or
/// `weekly from 2020/01/01 to 2020/06/01`
pub fn parse_period(input: &str) -> Result<ReportInterval, PeriodError> {
    let lowered = input.trim().to_lowercase();
    if lowered.is_empty() {
        return Err(PeriodError::MissingPeriod);
    }
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    let mut period = None;
    let mut start = None;
    let mut end = None;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "daily" => {
                period = Some(Period::Daily(1));
                i += 1;
            }
            "weekly" => {
                period = Some(Period::Weekly(1));
                i += 1;
            }
            "biweekly" => {
                period = Some(Period::Weekly(2));
                i += 1;
            }
            "monthly" => {
                period = Some(Period::Monthly(1));
                i += 1;
            }
            "bimonthly" => {
                period = Some(Period::Monthly(2));
                i += 1;
            }
            "quarterly" => {
                period = Some(Period::Quarterly(1));
                i += 1;
            }
            "yearly" | "annually" => {
                period = Some(Period::Yearly(1));
                i += 1;
            }
            "every" => {
                let word = tokens
                    .get(i + 1)
                    .ok_or_else(|| PeriodError::InvalidFormat(lowered.clone()))?;
                if let Ok(n) = word.parse::<u32>() {
                    if n == 0 {
                        return Err(PeriodError::InvalidNumber(word.to_string()));
                    }
                    let unit = tokens
                        .get(i + 2)
                        .ok_or_else(|| PeriodError::InvalidFormat(lowered.clone()))?;
                    period = Some(unit_period(unit, n)?);
                    i += 3;
                } else {
                    period = Some(unit_period(word, 1)?);
                    i += 2;
                }
            }
            "from" => {
                let word = tokens
                    .get(i + 1)
                    .ok_or_else(|| PeriodError::InvalidFormat(lowered.clone()))?;
                start = Some(parse_interval_date(word)?);
                i += 2;
            }
            "to" | "until" => {
                let word = tokens
                    .get(i + 1)
                    .ok_or_else(|| PeriodError::InvalidFormat(lowered.clone()))?;
                end = Some(parse_interval_date(word)?);
                i += 2;
            }
            other => return Err(PeriodError::UnknownKeyword(other.to_string())),
        }
    }

    if period.is_none() && start.is_none() && end.is_none() {
        return Err(PeriodError::MissingPeriod);
    }
    Ok(ReportInterval { period, start, end })
}

fn unit_period(unit: &str, n: u32) -> Result<Period, PeriodError> {
    match unit {
        "day" | "days" => Ok(Period::Daily(n)),
        "week" | "weeks" => Ok(Period::Weekly(n)),
        "month" | "months" => Ok(Period::Monthly(n)),
        "quarter" | "quarters" => Ok(Period::Quarterly(n)),
        "year" | "years" => Ok(Period::Yearly(n)),
        other => Err(PeriodError::UnknownKeyword(other.to_string())),
    }
}

fn parse_interval_date(s: &str) -> Result<NaiveDate, PeriodError> {
    let normalized = s.replace('/', "-");
    let parts: Vec<&str> = normalized.split('-').collect();
    let bad = || PeriodError::InvalidDate(s.to_string());
    let number = |part: &str| part.parse::<u32>().map_err(|_| bad());
    let (year, month, day) = match parts.as_slice() {
        [y, m, d] => (y.parse::<i32>().map_err(|_| bad())?, number(m)?, number(d)?),
        [y, m] => (y.parse::<i32>().map_err(|_| bad())?, number(m)?, 1),
        [y] => (y.parse::<i32>().map_err(|_| bad())?, 1, 1),
        _ => return Err(bad()),
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(parse_period("monthly").unwrap().period, Some(Period::Monthly(1)));
        assert_eq!(parse_period("biweekly").unwrap().period, Some(Period::Weekly(2)));
        assert_eq!(parse_period("every 2 weeks").unwrap().period, Some(Period::Weekly(2)));
        assert_eq!(parse_period("every quarter").unwrap().period, Some(Period::Quarterly(1)));
    }

    #[test]
    fn test_parse_range() {
        let interval = parse_period("weekly from 2020/01/01 to 2020/06/01").unwrap();
        assert_eq!(interval.period, Some(Period::Weekly(1)));
        assert_eq!(interval.start, Some(date(2020, 1, 1)));
        assert_eq!(interval.end, Some(date(2020, 6, 1)));

        let bare = parse_period("from 2020-01 to 2020-03").unwrap();
        assert_eq!(bare.period, None);
        assert_eq!(bare.start, Some(date(2020, 1, 1)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_period(""), Err(PeriodError::MissingPeriod));
        assert_eq!(parse_period("fortnightly"), Err(PeriodError::UnknownKeyword("fortnightly".into())));
        assert_eq!(parse_period("every 0 days"), Err(PeriodError::InvalidNumber("0".into())));
        assert!(matches!(parse_period("from soon"), Err(PeriodError::InvalidDate(_))));
    }

    #[test]
    fn test_monthly_buckets() {
        let interval = parse_period("monthly").unwrap();
        let bucket = interval.bucket_of(date(2020, 1, 15), Weekday::Sun).unwrap();
        assert_eq!(bucket, (date(2020, 1, 1), date(2020, 2, 1)));

        let buckets = interval.buckets(date(2020, 1, 15), date(2020, 3, 2), Weekday::Sun);
        assert_eq!(
            buckets,
            vec![
                (date(2020, 1, 1), date(2020, 2, 1)),
                (date(2020, 2, 1), date(2020, 3, 1)),
                (date(2020, 3, 1), date(2020, 4, 1)),
            ]
        );
    }

    #[test]
    fn test_buckets_are_disjoint_and_cover() {
        let interval = parse_period("every 2 weeks").unwrap();
        let buckets = interval.buckets(date(2020, 1, 1), date(2020, 3, 1), Weekday::Sun);
        for window in buckets.windows(2) {
            assert_eq!(window[0].1, window[1].0);
        }
        for day in [date(2020, 1, 1), date(2020, 2, 14), date(2020, 3, 1)] {
            assert!(buckets.iter().any(|(s, e)| day >= *s && day < *e));
        }
    }

    #[test]
    fn test_weekly_bucket_respects_week_start() {
        let interval = parse_period("weekly").unwrap();
        // 2020-01-15 was a Wednesday
        let sun = interval.bucket_of(date(2020, 1, 15), Weekday::Sun).unwrap();
        assert_eq!(sun.0, date(2020, 1, 12));
        let mon = interval.bucket_of(date(2020, 1, 15), Weekday::Mon).unwrap();
        assert_eq!(mon.0, date(2020, 1, 13));
    }

    #[test]
    fn test_explicit_start_anchors_buckets() {
        let interval = parse_period("every 10 days from 2020-01-03").unwrap();
        let bucket = interval.bucket_of(date(2020, 1, 27), Weekday::Sun).unwrap();
        assert_eq!(bucket, (date(2020, 1, 23), date(2020, 2, 2)));
        assert_eq!(interval.bucket_of(date(2020, 1, 1), Weekday::Sun), None);
    }

    #[test]
    fn test_quarterly_natural_boundary() {
        let interval = parse_period("quarterly").unwrap();
        let bucket = interval.bucket_of(date(2020, 5, 20), Weekday::Sun).unwrap();
        assert_eq!(bucket, (date(2020, 4, 1), date(2020, 7, 1)));
    }

    #[test]
    fn test_month_end_clamping() {
        assert_eq!(Period::Monthly(1).add_to(date(2020, 1, 31)), date(2020, 2, 29));
        assert_eq!(Period::Monthly(1).add_to(date(2019, 1, 31)), date(2019, 2, 28));
        assert_eq!(Period::Yearly(1).add_to(date(2020, 2, 29)), date(2021, 2, 28));
    }
}
