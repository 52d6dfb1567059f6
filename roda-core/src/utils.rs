use chrono::{Days, NaiveDate, NaiveDateTime, Utc};

/// The dashed date format used in partition keys and handler parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string.
pub fn validate_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_dashed_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// The default processing date when none is given: yesterday, UTC.
pub fn yesterday_utc() -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .expect("date arithmetic cannot underflow for current dates")
}

/// Parse a datetime string with the given strftime format into unix seconds.
pub fn to_unix_timestamp(s: &str, format: &str) -> Result<i64, chrono::ParseError> {
    // Date-only formats parse as midnight.
    match NaiveDateTime::parse_from_str(s, format) {
        Ok(dt) => Ok(dt.and_utc().timestamp()),
        Err(_) => {
            let date = NaiveDate::parse_from_str(s, format)?;
            Ok(date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always a valid time")
                .and_utc()
                .timestamp())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dashed_dates_round_trip() {
        let d = validate_date("2024-02-29").unwrap();
        assert_eq!(format_dashed_date(d), "2024-02-29");
        assert!(validate_date("02/29/2024").is_err());
    }

    #[test]
    fn unix_conversion_handles_date_only_formats() {
        assert_eq!(to_unix_timestamp("1970-01-02", "%Y-%m-%d").unwrap(), 86400);
        assert_eq!(
            to_unix_timestamp("1970-01-01 01:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
            3600
        );
    }
}
