use assert_matches::assert_matches;
use rivulet_engine::engine::{DataError, DateTimeNaive, DateTimeUtc, Duration, Error};

const HOUR: i64 = 3_600_000_000_000;

#[test]
fn test_strptime_datetime() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25 12:34:56", "%Y-%m-%d %H:%M:%S")?;
    assert_eq!(dt.year(), 2023);
    assert_eq!(dt.month(), 3);
    assert_eq!(dt.day(), 25);
    assert_eq!(dt.hour(), 12);
    assert_eq!(dt.minute(), 34);
    assert_eq!(dt.second(), 56);
    Ok(())
}

#[test]
fn test_strptime_date_only_and_time_only() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25", "%Y-%m-%d")?;
    assert_eq!(dt.day(), 25);
    assert_eq!(dt.hour(), 0);

    let dt = DateTimeNaive::strptime("12:34:56", "%H:%M:%S")?;
    assert_eq!(dt.year(), 1900);
    assert_eq!(dt.hour(), 12);
    Ok(())
}

#[test]
fn test_strptime_fractional_seconds() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25 12:00:00.123456789", "%Y-%m-%d %H:%M:%S.%f")?;
    assert_eq!(dt.nanosecond(), 123_456_789);
    assert_eq!(dt.millisecond(), 123);
    Ok(())
}

#[test]
fn test_strptime_errors() {
    assert_matches!(
        DateTimeNaive::strptime("not a date", "%Y-%m-%d"),
        Err(DataError::ParseError(_))
    );
    // "%f" without the leading dot means something else in chrono
    assert_matches!(
        DateTimeNaive::strptime("12:00:00123", "%H:%M:%S%f"),
        Err(DataError::ParseError(_))
    );
}

#[test]
fn test_strftime() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25 12:34:56", "%Y-%m-%d %H:%M:%S")?;
    assert_eq!(dt.strftime("%Y-%m-%d"), "2023-03-25");
    assert_eq!(dt.strftime("%H:%M"), "12:34");
    Ok(())
}

#[test]
fn test_round_and_truncate() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25 12:40:00", "%Y-%m-%d %H:%M:%S")?;
    assert_eq!(dt.round(Duration::new(HOUR)).hour(), 13);
    assert_eq!(dt.truncate(Duration::new(HOUR)).hour(), 12);
    assert_eq!(dt.truncate(Duration::new(HOUR)).minute(), 0);
    Ok(())
}

#[test]
fn test_from_timestamp_units() -> eyre::Result<()> {
    assert_eq!(
        DateTimeNaive::from_timestamp(1, "s")?.timestamp(),
        1_000_000_000
    );
    assert_eq!(DateTimeNaive::from_timestamp(1, "ms")?.timestamp(), 1_000_000);
    assert_eq!(DateTimeNaive::from_timestamp(1, "ns")?.timestamp(), 1);
    assert_matches!(
        DateTimeNaive::from_timestamp(1, "h"),
        Err(Error::Data(DataError::ValueError(_)))
    );
    Ok(())
}

#[test]
fn test_timezone_conversions() -> eyre::Result<()> {
    let noon = DateTimeNaive::strptime("2023-01-01 12:00:00", "%Y-%m-%d %H:%M:%S")?;
    let utc = noon.to_utc_from_timezone("UTC")?;
    assert_eq!(utc.timestamp(), noon.timestamp());
    assert_eq!(utc.to_naive_in_timezone("Europe/Warsaw")?.hour(), 13);

    assert_matches!(
        noon.to_utc_from_timezone("Not/AZone"),
        Err(DataError::ParseError(_))
    );
    Ok(())
}

#[test]
fn test_timezone_dst_gap() -> eyre::Result<()> {
    // 02:30 does not exist in Warsaw on this night; the first hour after
    // the gap is taken
    let gap = DateTimeNaive::strptime("2023-03-26 02:30:00", "%Y-%m-%d %H:%M:%S")?;
    let utc = gap.to_utc_from_timezone("Europe/Warsaw")?;
    let expected = DateTimeNaive::strptime("2023-03-26 01:00:00", "%Y-%m-%d %H:%M:%S")?
        .to_utc_from_timezone("UTC")?;
    assert_eq!(utc, expected);
    Ok(())
}

#[test]
fn test_datetime_arithmetic() -> eyre::Result<()> {
    let dt = DateTimeNaive::strptime("2023-03-25 12:00:00", "%Y-%m-%d %H:%M:%S")?;
    assert_eq!((dt + Duration::new(HOUR)).hour(), 13);
    assert_eq!((dt - Duration::new(HOUR)).hour(), 11);

    let later = DateTimeNaive::strptime("2023-03-25 15:00:00", "%Y-%m-%d %H:%M:%S")?;
    assert_eq!(later - dt, Duration::new(3 * HOUR));
    Ok(())
}

#[test]
fn test_utc_strptime() -> eyre::Result<()> {
    let dt = DateTimeUtc::strptime("2023-03-25 12:00:00 +0100", "%Y-%m-%d %H:%M:%S %z")?;
    assert_eq!(dt.hour(), 11);
    Ok(())
}

#[test]
fn test_duration_division() -> eyre::Result<()> {
    let three_hours = Duration::new(3 * HOUR);
    assert_eq!((three_hours / Duration::new(2 * HOUR))?, 1);
    assert_eq!((three_hours % Duration::new(2 * HOUR))?, Duration::new(HOUR));
    assert_eq!(three_hours.true_div(Duration::new(2 * HOUR))?, 1.5);
    assert_matches!(
        three_hours / Duration::new(0),
        Err(DataError::DivisionByZero)
    );
    Ok(())
}

#[test]
fn test_duration_1() -> eyre::Result<()> {
    let d = Duration::new(93784987654321);
    assert_eq!(d.to_string(), "1d 2h 3m 4s 987654321ns");
    let d = Duration::new(-93784987654321);
    assert_eq!(d.to_string(), "-1d -2h -3m -4s -987654321ns");
    Ok(())
}

#[test]
fn test_duration_2() -> eyre::Result<()> {
    let d = Duration::new(2);
    assert_eq!(d.to_string(), "2ns");
    let d = Duration::new(-2);
    assert_eq!(d.to_string(), "-2ns");
    Ok(())
}

#[test]
fn test_duration_skip_units() -> eyre::Result<()> {
    let d = Duration::new(86400987654321);
    assert_eq!(d.to_string(), "1d 987654321ns");
    let d = Duration::new(-86400987654321);
    assert_eq!(d.to_string(), "-1d -987654321ns");
    Ok(())
}

#[test]
fn test_duration_zero_sec() -> eyre::Result<()> {
    let d = Duration::new(1197780000000000);
    assert_eq!(d.to_string(), "13d 20h 43m");
    let d = Duration::new(-1197780000000000);
    assert_eq!(d.to_string(), "-13d -20h -43m");
    Ok(())
}
