//! Parsers for user-typed values. Each returns the normalized value or the
//! specific [`ValidationError`] to show the user.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;

use crate::error::ValidationError;
use crate::store::model::DATE_FORMAT;

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,2}\.[0-9]{1,2}\.[0-9]{4}$").expect("valid date pattern"));

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\+7|7|8)?[\s\-]?\(?[489][0-9]{2}\)?[\s\-]?[0-9]{3}[\s\-]?[0-9]{2}[\s\-]?[0-9]{2}$",
    )
    .expect("valid phone pattern")
});

/// Seat count bounds, inclusive.
pub const MIN_SEATS: i64 = 1;
pub const MAX_SEATS: i64 = 10;

/// Parse `DD.MM.YYYY` (one- or two-digit day and month) into the
/// storage form `YYYY-MM-DD`.
pub fn parse_date(input: &str) -> Result<String, ValidationError> {
    let input = input.trim();
    if !DATE_PATTERN.is_match(input) {
        return Err(ValidationError::DateFormat);
    }

    let mut parts = input.split('.').map(str::parse::<u32>);
    let (Some(Ok(day)), Some(Ok(month)), Some(Ok(year))) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ValidationError::DateFormat);
    };

    if !(1..=12).contains(&month) {
        return Err(ValidationError::MonthOutOfRange);
    }
    if year == 0 {
        return Err(ValidationError::YearOutOfRange);
    }
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or(ValidationError::DayOutOfRange)?;
    Ok(date.format(DATE_FORMAT).to_string())
}

/// Render a stored date as `DD.MM.YYYY`. Dotted input is re-padded and
/// anything unrecognized is returned unchanged.
pub fn format_date_for_display(stored: &str) -> String {
    if stored.contains('.') {
        let parts: Vec<&str> = stored.split('.').collect();
        if let [day, month, year] = parts.as_slice()
            && let (Ok(day), Ok(month)) = (day.parse::<u32>(), month.parse::<u32>())
        {
            return format!("{day:02}.{month:02}.{year}");
        }
        return stored.to_string();
    }

    match NaiveDate::parse_from_str(stored, DATE_FORMAT) {
        Ok(date) => date.format("%d.%m.%Y").to_string(),
        Err(_) => stored.to_string(),
    }
}

/// Parse `HH:MM` and normalize to two-digit hour and minute.
pub fn parse_time(input: &str) -> Result<String, ValidationError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| ValidationError::TimeFormat)
}

pub fn parse_seats(input: &str) -> Result<i64, ValidationError> {
    let seats: i64 = input
        .trim()
        .parse()
        .map_err(|_| ValidationError::SeatsNotNumber)?;
    if !(MIN_SEATS..=MAX_SEATS).contains(&seats) {
        return Err(ValidationError::SeatsOutOfRange);
    }
    Ok(seats)
}

/// Validate a typed phone number and normalize it to a leading-`7` digit
/// string.
pub fn parse_phone(input: &str) -> Result<String, ValidationError> {
    let input = input.trim();
    if !PHONE_PATTERN.is_match(input) {
        return Err(ValidationError::PhoneFormat);
    }

    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    Ok(to_leading_seven(digits))
}

/// Normalize a phone number from a shared contact card. Contact cards are
/// trusted, so this only reshapes the digits.
pub fn normalize_contact_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    to_leading_seven(&digits)
}

fn to_leading_seven(digits: &str) -> String {
    match (digits.len(), digits.strip_prefix('8')) {
        (11, Some(rest)) => format!("7{rest}"),
        (10, _) => format!("7{digits}"),
        _ => digits.to_string(),
    }
}

/// A non-empty, trimmed location name.
pub fn parse_location(input: &str) -> Result<String, ValidationError> {
    let location = input.trim();
    if location.is_empty() {
        return Err(ValidationError::EmptyLocation);
    }
    Ok(location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_pads_dates() {
        assert_eq!(parse_date("31.12.2024").unwrap(), "2024-12-31");
        assert_eq!(parse_date(" 1.2.2025 ").unwrap(), "2025-02-01");
        assert_eq!(parse_date("29.02.2024").unwrap(), "2024-02-29");
    }

    #[test]
    fn date_errors_are_specific() {
        assert_eq!(parse_date("2024-12-31"), Err(ValidationError::DateFormat));
        assert_eq!(parse_date("31/12/2024"), Err(ValidationError::DateFormat));
        assert_eq!(parse_date("1.1.24"), Err(ValidationError::DateFormat));
        assert_eq!(parse_date("10.13.2024"), Err(ValidationError::MonthOutOfRange));
        assert_eq!(parse_date("10.00.2024"), Err(ValidationError::MonthOutOfRange));
        assert_eq!(parse_date("29.02.2023"), Err(ValidationError::DayOutOfRange));
        assert_eq!(parse_date("32.01.2024"), Err(ValidationError::DayOutOfRange));
        assert_eq!(parse_date("00.01.2024"), Err(ValidationError::DayOutOfRange));
        assert_eq!(parse_date("01.01.0000"), Err(ValidationError::YearOutOfRange));
    }

    #[test]
    fn date_round_trips_for_every_day_of_a_leap_year() {
        let mut day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        while day.format("%Y").to_string() == "2024" {
            let typed = day.format("%d.%m.%Y").to_string();
            let stored = parse_date(&typed).unwrap();
            assert_eq!(format_date_for_display(&stored), typed);
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn display_handles_odd_inputs() {
        assert_eq!(format_date_for_display("1.2.2024"), "01.02.2024");
        assert_eq!(format_date_for_display("tomorrow"), "tomorrow");
        assert_eq!(format_date_for_display("a.b.c"), "a.b.c");
    }

    #[test]
    fn times() {
        assert_eq!(parse_time("14:30").unwrap(), "14:30");
        assert_eq!(parse_time("9:05").unwrap(), "09:05");
        assert_eq!(parse_time("24:00"), Err(ValidationError::TimeFormat));
        assert_eq!(parse_time("14.30"), Err(ValidationError::TimeFormat));
        assert_eq!(parse_time("noon"), Err(ValidationError::TimeFormat));
    }

    #[test]
    fn seats() {
        assert_eq!(parse_seats("4").unwrap(), 4);
        assert_eq!(parse_seats(" 10 ").unwrap(), 10);
        assert_eq!(parse_seats("11"), Err(ValidationError::SeatsOutOfRange));
        assert_eq!(parse_seats("0"), Err(ValidationError::SeatsOutOfRange));
        assert_eq!(parse_seats("four"), Err(ValidationError::SeatsNotNumber));
    }

    #[test]
    fn phones_normalize_to_leading_seven() {
        assert_eq!(parse_phone("89123456789").unwrap(), "79123456789");
        assert_eq!(parse_phone("+7 (912) 345-67-89").unwrap(), "79123456789");
        assert_eq!(parse_phone("7 912 345 67 89").unwrap(), "79123456789");
        assert_eq!(parse_phone("9123456789").unwrap(), "79123456789");
        assert_eq!(parse_phone("12345"), Err(ValidationError::PhoneFormat));
        assert_eq!(parse_phone("+1 912 345 67 89"), Err(ValidationError::PhoneFormat));
    }

    #[test]
    fn contact_phones() {
        assert_eq!(normalize_contact_phone("+79123456789"), "79123456789");
        assert_eq!(normalize_contact_phone("89123456789"), "79123456789");
        assert_eq!(normalize_contact_phone("+44 20 7946 0958"), "442079460958");
    }

    #[test]
    fn locations() {
        assert_eq!(parse_location("  Kazan ").unwrap(), "Kazan");
        assert_eq!(parse_location("   "), Err(ValidationError::EmptyLocation));
    }
}
