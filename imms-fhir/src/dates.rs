//! Date/time normalisation for the four flat-record date fields (§4.2).
//!
//! `PERSON_DOB`, `RECORDED_DATE` and `EXPIRY_DATE` are plain dates reduced to
//! `YYYYMMDD`. `DATE_AND_TIME` additionally carries a two-digit timezone tag
//! that is only ever `"00"` (UTC) or `"01"` (BST); any other offset is
//! treated the same as an unparseable value, not as an error worth logging —
//! the field is simply left blank.

use chrono::{DateTime, FixedOffset, NaiveDate};

/// `YYYYMMDD`, or `""` if `raw` is absent, empty, or not a valid date.
pub fn to_flat_date(raw: Option<&str>) -> String {
    let Some(raw) = raw else { return String::new() };
    if raw.is_empty() {
        return String::new();
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date.format("%Y%m%d").to_string(),
        Err(_) => String::new(),
    }
}

/// `YYYYMMDDTHHMMSSzz`, or `""` if `raw` is absent, empty, unparseable, or
/// carries an offset other than `+00:00`/`+01:00`. A missing offset is
/// treated as UTC.
pub fn to_flat_date_time(raw: Option<&str>) -> String {
    let Some(raw) = raw else { return String::new() };
    if raw.is_empty() {
        return String::new();
    }

    let parsed = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| format!("{raw}+00:00").parse::<DateTime<FixedOffset>>());

    let Ok(dt) = parsed else { return String::new() };

    let offset_seconds = dt.offset().local_minus_utc();
    let tz_tag = match offset_seconds {
        0 => "00",
        3600 => "01",
        _ => return String::new(),
    };

    format!("{}{tz_tag}", dt.format("%Y%m%dT%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dob_converts_plain_date() {
        assert_eq!(to_flat_date(Some("1965-02-28")), "19650228");
    }

    #[test]
    fn dob_missing_or_empty_is_blank() {
        assert_eq!(to_flat_date(None), "");
        assert_eq!(to_flat_date(Some("")), "");
    }

    #[test]
    fn date_and_time_with_utc_offset() {
        assert_eq!(
            to_flat_date_time(Some("2025-04-06T13:28:17+00:00")),
            "20250406T13281700"
        );
    }

    #[test]
    fn date_and_time_with_bst_offset() {
        assert_eq!(
            to_flat_date_time(Some("2025-04-06T13:28:17+01:00")),
            "20250406T13281701"
        );
    }

    #[test]
    fn date_and_time_without_timezone_defaults_to_utc() {
        assert_eq!(
            to_flat_date_time(Some("2025-04-06T13:28:17")),
            "20250406T13281700"
        );
    }

    #[test]
    fn date_and_time_with_unsupported_offset_is_blank() {
        assert_eq!(to_flat_date_time(Some("2025-04-06T13:28:17+02:00")), "");
    }

    #[test]
    fn date_and_time_empty_or_invalid_is_blank() {
        assert_eq!(to_flat_date_time(Some("")), "");
        assert_eq!(to_flat_date_time(Some("not-a-date")), "");
    }
}
