use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Days between 1899-12-30 and 1904-01-01.
const DATEMODE_1904_OFFSET: f64 = 1462.0;
/// Day count of 1970-01-01 in the 1900 system.
const UNIX_EPOCH_DAYS: f64 = 25569.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Spreadsheet-style day count to a calendar timestamp.
///
/// `datemode` 0 counts from 1899-12-30, 1 from 1904-01-01. Fractions of a
/// day are kept to the microsecond. NaN and out-of-range values give `None`.
pub fn day_count_to_datetime(days: f64, datemode: u8) -> Option<NaiveDateTime> {
    if !days.is_finite() {
        return None;
    }
    let total = days + DATEMODE_1904_OFFSET * f64::from(datemode);
    let micros = (total * SECONDS_PER_DAY * 1e6).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(Duration::microseconds(micros as i64))
}

/// Day count formatted as `YYYY-MM-DD HH:MM:SS`.
pub fn day_count_to_string(days: f64, datemode: u8) -> Option<String> {
    day_count_to_datetime(days, datemode).map(|dt| dt.format(DATETIME_FORMAT).to_string())
}

/// Day count (1900 system) to seconds since the Unix epoch.
pub fn day_count_to_unix_seconds(days: f64) -> f64 {
    (days - UNIX_EPOCH_DAYS) * SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_day_counts() {
        assert_eq!(
            day_count_to_string(42_000.0 + 30.0 / 86_400.0, 0).as_deref(),
            Some("2014-12-27 00:00:30")
        );
        assert_eq!(
            day_count_to_string(25_569.5, 0).as_deref(),
            Some("1970-01-01 12:00:00")
        );
    }

    #[test]
    fn datemode_1904_shifts_by_offset() {
        let a = day_count_to_datetime(100.0, 1).unwrap();
        let b = day_count_to_datetime(100.0 + DATEMODE_1904_OFFSET, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nan_has_no_timestamp() {
        assert!(day_count_to_string(f64::NAN, 0).is_none());
    }

    #[test]
    fn unix_seconds() {
        assert_eq!(day_count_to_unix_seconds(UNIX_EPOCH_DAYS), 0.0);
        assert_eq!(day_count_to_unix_seconds(UNIX_EPOCH_DAYS + 1.0), 86_400.0);
    }
}
