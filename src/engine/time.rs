// Copyright © 2024 Pathway

use std::fmt::{self, Display};
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use chrono::{Datelike, DurationRound, LocalResult, TimeZone, Timelike};
use chrono_tz::Tz;
use num_integer::Integer;
use serde::{Deserialize, Serialize};

use super::error::{DataError, DataResult};
use super::Result;

const NANOS_IN_SECOND: i64 = 1_000_000_000;

fn unit_multiplier(unit: &str) -> DataResult<i64> {
    match unit {
        "s" => Ok(NANOS_IN_SECOND),
        "ms" => Ok(1_000_000),
        "us" => Ok(1_000),
        "ns" => Ok(1),
        _ => Err(DataError::ValueError(format!(
            "unit has to be one of s, ms, us, ns but is {unit:?}"
        ))),
    }
}

fn parse_timezone(timezone: &str) -> DataResult<Tz> {
    timezone.parse().map_err(|e| {
        DataError::ParseError(format!("cannot parse time zone {timezone:?}: {e}"))
    })
}

// pandas-style fractional seconds are written ".%f"; chrono spells the
// same thing "%.f" and gives a bare "%f" a different meaning
fn chrono_format(format: &str) -> DataResult<String> {
    let format = format.replace(".%f", "%.f");
    if format.matches("%f").count() == format.matches("%%f").count() {
        Ok(format)
    } else {
        Err(DataError::ParseError(format!(
            "cannot use format {format:?}: using \"%f\" without the leading dot is not supported"
        )))
    }
}

macro_rules! impl_timestamp_methods {
    ($type_:ty) => {
        impl $type_ {
            pub fn new(nanos: i64) -> Self {
                Self { nanos }
            }

            pub fn timestamp(&self) -> i64 {
                self.nanos
            }

            pub fn from_timestamp(timestamp: i64, unit: &str) -> Result<Self> {
                Ok(Self::new(timestamp * unit_multiplier(unit)?))
            }

            fn as_chrono_datetime(&self) -> chrono::NaiveDateTime {
                let (secs, subsecond_nanos) = self.nanos.div_mod_floor(&NANOS_IN_SECOND);
                chrono::DateTime::from_timestamp(secs, u32::try_from(subsecond_nanos).unwrap())
                    .unwrap()
                    .naive_utc()
            }

            pub fn nanosecond(&self) -> i64 {
                self.as_chrono_datetime().nanosecond().into()
            }

            pub fn microsecond(&self) -> i64 {
                (self.as_chrono_datetime().nanosecond() / 1_000).into()
            }

            pub fn millisecond(&self) -> i64 {
                (self.as_chrono_datetime().nanosecond() / 1_000_000).into()
            }

            pub fn second(&self) -> i64 {
                self.as_chrono_datetime().second().into()
            }

            pub fn minute(&self) -> i64 {
                self.as_chrono_datetime().minute().into()
            }

            pub fn hour(&self) -> i64 {
                self.as_chrono_datetime().hour().into()
            }

            pub fn day(&self) -> i64 {
                self.as_chrono_datetime().day().into()
            }

            pub fn month(&self) -> i64 {
                self.as_chrono_datetime().month().into()
            }

            pub fn year(&self) -> i64 {
                self.as_chrono_datetime().year().into()
            }

            #[must_use]
            pub fn round(&self, duration: Duration) -> Self {
                let rounded = self
                    .as_chrono_datetime()
                    .duration_round(duration.as_chrono_duration())
                    .unwrap();
                Self::new(rounded.and_utc().timestamp_nanos_opt().unwrap())
            }

            #[must_use]
            pub fn truncate(&self, duration: Duration) -> Self {
                let truncated = self
                    .as_chrono_datetime()
                    .duration_trunc(duration.as_chrono_duration())
                    .unwrap();
                Self::new(truncated.and_utc().timestamp_nanos_opt().unwrap())
            }
        }

        impl Add<Duration> for $type_ {
            type Output = Self;

            fn add(self, other: Duration) -> Self::Output {
                Self::new(self.nanos + other.nanos)
            }
        }

        impl Sub<Duration> for $type_ {
            type Output = Self;

            fn sub(self, other: Duration) -> Self::Output {
                Self::new(self.nanos - other.nanos)
            }
        }

        impl Sub for $type_ {
            type Output = Duration;

            fn sub(self, other: Self) -> Duration {
                Duration::new(self.nanos - other.nanos)
            }
        }
    };
}

/// A timezone-unaware datetime, stored as nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTimeNaive {
    nanos: i64,
}

impl_timestamp_methods!(DateTimeNaive);

impl DateTimeNaive {
    pub fn strptime(date_string: &str, format: &str) -> DataResult<Self> {
        let format = chrono_format(format)?;
        // accept a full datetime, a bare date, or a bare time
        let datetime = chrono::NaiveDateTime::parse_from_str(date_string, &format)
            .or_else(|_| {
                chrono::NaiveDate::parse_from_str(date_string, &format)
                    .map(|date| date.and_hms_opt(0, 0, 0).unwrap())
            })
            .or_else(|_| {
                chrono::NaiveTime::parse_from_str(date_string, &format).map(|time| {
                    chrono::NaiveDate::from_ymd_opt(1900, 1, 1)
                        .unwrap()
                        .and_time(time)
                })
            })
            .map_err(|_| {
                DataError::ParseError(format!(
                    "cannot parse date {date_string:?} using format {format:?}"
                ))
            })?;
        Ok(datetime.into())
    }

    pub fn to_utc_from_timezone(&self, timezone: &str) -> DataResult<DateTimeUtc> {
        let tz = parse_timezone(timezone)?;
        match tz.from_local_datetime(&self.as_chrono_datetime()) {
            LocalResult::Single(localized) | LocalResult::Ambiguous(_, localized) => {
                Ok(localized.into())
            }
            LocalResult::None => {
                // a local time skipped by a DST jump; take the first full
                // hour after the gap
                let shifted = self.as_chrono_datetime()
                    + chrono::Duration::try_minutes(30).unwrap();
                let shifted = shifted
                    .duration_round(chrono::Duration::try_hours(1).unwrap())
                    .unwrap();
                if let LocalResult::Single(localized) = tz.from_local_datetime(&shifted) {
                    Ok(localized.into())
                } else {
                    Err(DataError::DateTimeConversionError)
                }
            }
        }
    }

    pub fn strftime(&self, format: &str) -> String {
        self.as_chrono_datetime().format(format).to_string()
    }
}

impl From<chrono::NaiveDateTime> for DateTimeNaive {
    fn from(value: chrono::NaiveDateTime) -> Self {
        Self::new(value.and_utc().timestamp_nanos_opt().unwrap())
    }
}

impl Display for DateTimeNaive {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.strftime("%Y-%m-%dT%H:%M:%S%.9f"))
    }
}

/// A UTC datetime, stored as nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTimeUtc {
    nanos: i64,
}

impl_timestamp_methods!(DateTimeUtc);

impl DateTimeUtc {
    pub fn strptime(date_string: &str, format: &str) -> DataResult<Self> {
        let format = chrono_format(format)?;
        chrono::DateTime::parse_from_str(date_string, &format)
            .map(Into::into)
            .map_err(|e| {
                DataError::ParseError(format!(
                    "cannot parse date {date_string:?} using format {format:?}: {e}"
                ))
            })
    }

    pub fn to_naive_in_timezone(&self, timezone: &str) -> DataResult<DateTimeNaive> {
        let tz = parse_timezone(timezone)?;
        let localized = tz.from_utc_datetime(&self.as_chrono_datetime());
        Ok(localized.naive_local().into())
    }

    pub fn strftime(&self, format: &str) -> String {
        chrono::Utc
            .timestamp_nanos(self.nanos)
            .format(format)
            .to_string()
    }
}

impl<Z: chrono::TimeZone> From<chrono::DateTime<Z>> for DateTimeUtc {
    fn from(value: chrono::DateTime<Z>) -> Self {
        Self::new(value.timestamp_nanos_opt().unwrap())
    }
}

impl Display for DateTimeUtc {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.strftime("%Y-%m-%dT%H:%M:%S%.9f%z"))
    }
}

/// A signed span of time with nanosecond resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    nanos: i64,
}

impl Duration {
    pub fn new(nanos: i64) -> Self {
        Self { nanos }
    }

    fn as_chrono_duration(self) -> chrono::Duration {
        chrono::Duration::nanoseconds(self.nanos)
    }

    pub fn nanoseconds(&self) -> i64 {
        self.nanos
    }

    pub fn microseconds(&self) -> i64 {
        self.nanos / 1_000
    }

    pub fn milliseconds(&self) -> i64 {
        self.nanos / 1_000_000
    }

    pub fn seconds(&self) -> i64 {
        self.nanos / NANOS_IN_SECOND
    }

    pub fn minutes(&self) -> i64 {
        self.nanos / (60 * NANOS_IN_SECOND)
    }

    pub fn hours(&self) -> i64 {
        self.nanos / (3_600 * NANOS_IN_SECOND)
    }

    pub fn days(&self) -> i64 {
        self.nanos / (86_400 * NANOS_IN_SECOND)
    }

    pub fn weeks(&self) -> i64 {
        self.nanos / (7 * 86_400 * NANOS_IN_SECOND)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn true_div(self, other: Self) -> DataResult<f64> {
        if other.nanos == 0 {
            Err(DataError::DivisionByZero)
        } else {
            Ok(self.nanos as f64 / other.nanos as f64)
        }
    }
}

impl Neg for Duration {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.nanos)
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.nanos + other.nanos)
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.nanos - other.nanos)
    }
}

impl Mul<i64> for Duration {
    type Output = Self;

    fn mul(self, other: i64) -> Self::Output {
        Self::new(self.nanos * other)
    }
}

impl Div for Duration {
    type Output = DataResult<i64>;

    fn div(self, other: Self) -> Self::Output {
        if other.nanos == 0 {
            Err(DataError::DivisionByZero)
        } else {
            Ok(Integer::div_floor(&self.nanos, &other.nanos))
        }
    }
}

impl Div<i64> for Duration {
    type Output = DataResult<Duration>;

    fn div(self, other: i64) -> Self::Output {
        if other == 0 {
            Err(DataError::DivisionByZero)
        } else {
            Ok(Self::new(Integer::div_floor(&self.nanos, &other)))
        }
    }
}

impl Rem for Duration {
    type Output = DataResult<Duration>;

    fn rem(self, other: Self) -> Self::Output {
        if other.nanos == 0 {
            Err(DataError::DivisionByZero)
        } else {
            Ok(Self::new(Integer::mod_floor(&self.nanos, &other.nanos)))
        }
    }
}

impl Display for Duration {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        const UNITS: [(i64, &str); 5] = [
            (86_400 * NANOS_IN_SECOND, "d"),
            (3_600 * NANOS_IN_SECOND, "h"),
            (60 * NANOS_IN_SECOND, "m"),
            (NANOS_IN_SECOND, "s"),
            (1, "ns"),
        ];
        let mut remaining = self.nanos;
        let mut separator = "";
        for (unit_nanos, suffix) in UNITS {
            let count = remaining / unit_nanos;
            if count != 0 {
                write!(fmt, "{separator}{count}{suffix}")?;
                remaining %= unit_nanos;
                separator = " ";
            }
        }
        Ok(())
    }
}
