use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CounterError;

// Epoch milliseconds of the start of the bucket a timestamp falls into.
pub type BucketLabel = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::Second,
        Period::Minute,
        Period::Hour,
        Period::Day,
        Period::Month,
        Period::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    // Seconds until a bucket of this period naturally expires.
    pub fn expiration_secs(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Month => 2_592_000,
            Self::Year => 31_536_000,
        }
    }

    // Calendar-aligned (UTC) start of the bucket containing `now`.
    pub fn bucket_label(&self, now: DateTime<Utc>) -> BucketLabel {
        let secs = now.timestamp();
        match self {
            Self::Second => secs * 1_000,
            Self::Minute => floor_to(secs, 60) * 1_000,
            Self::Hour => floor_to(secs, 3_600) * 1_000,
            Self::Day => floor_to(secs, 86_400) * 1_000,
            Self::Month => NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
                .map(start_of_day_ms)
                .unwrap_or_else(|| Self::Day.bucket_label(now)),
            Self::Year => NaiveDate::from_ymd_opt(now.year(), 1, 1)
                .map(start_of_day_ms)
                .unwrap_or_else(|| Self::Day.bucket_label(now)),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(CounterError::UnknownPeriod(s.to_string())),
        }
    }
}

pub fn bucket_labels(now: DateTime<Utc>) -> BTreeMap<Period, BucketLabel> {
    Period::ALL
        .iter()
        .map(|period| (*period, period.bucket_label(now)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Limits(BTreeMap<Period, bool>);

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, period: Period, enabled: bool) -> Self {
        self.0.insert(period, enabled);
        self
    }

    pub fn enabled(&self) -> impl Iterator<Item = Period> + '_ {
        self.0
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(period, _)| *period)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled().next().is_none()
    }
}

impl FromIterator<Period> for Limits {
    fn from_iter<I: IntoIterator<Item = Period>>(iter: I) -> Self {
        Self(iter.into_iter().map(|period| (period, true)).collect())
    }
}

fn floor_to(secs: i64, step: i64) -> i64 {
    secs - secs.rem_euclid(step)
}

fn start_of_day_ms(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn labels_are_calendar_aligned() {
        let now = at(2024, 5, 17, 10, 4, 37) + chrono::Duration::milliseconds(250);
        let labels = bucket_labels(now);

        assert_eq!(labels[&Period::Second], at(2024, 5, 17, 10, 4, 37).timestamp_millis());
        assert_eq!(labels[&Period::Minute], at(2024, 5, 17, 10, 4, 0).timestamp_millis());
        assert_eq!(labels[&Period::Hour], at(2024, 5, 17, 10, 0, 0).timestamp_millis());
        assert_eq!(labels[&Period::Day], at(2024, 5, 17, 0, 0, 0).timestamp_millis());
        assert_eq!(labels[&Period::Month], at(2024, 5, 1, 0, 0, 0).timestamp_millis());
        assert_eq!(labels[&Period::Year], at(2024, 1, 1, 0, 0, 0).timestamp_millis());
    }

    #[test]
    fn same_bucket_within_window() {
        let a = at(2024, 5, 17, 10, 4, 1);
        let b = at(2024, 5, 17, 10, 4, 59);
        assert_eq!(Period::Minute.bucket_label(a), Period::Minute.bucket_label(b));
        assert_ne!(Period::Second.bucket_label(a), Period::Second.bucket_label(b));
    }

    #[test]
    fn parses_period_names() {
        assert_eq!("Minute".parse::<Period>().unwrap(), Period::Minute);
        assert_eq!("year".parse::<Period>().unwrap(), Period::Year);
        assert_eq!(
            "fortnight".parse::<Period>(),
            Err(CounterError::UnknownPeriod("fortnight".to_string()))
        );
    }

    #[test]
    fn limits_only_yield_enabled_periods() {
        let limits = Limits::new()
            .with(Period::Minute, true)
            .with(Period::Hour, false)
            .with(Period::Day, true);
        assert_eq!(limits.enabled().collect::<Vec<_>>(), vec![Period::Minute, Period::Day]);
        assert!(Limits::new().with(Period::Second, false).is_empty());

        let parsed: Limits = serde_json::from_str(r#"{"minute":true,"hour":false}"#).unwrap();
        assert_eq!(parsed.enabled().collect::<Vec<_>>(), vec![Period::Minute]);
    }
}
