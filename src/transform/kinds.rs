//! Format-preserving replacements, one function per kind.

use super::names::{GIVEN_NAMES, SURNAMES};
use super::{KeyStream, Pepper, ShapeError};
use chrono::{Days, NaiveDate};

/// Replace every letter and digit, keeping class and case per character.
///
/// Non-ASCII letters and digits are replaced too, with ASCII ones of the
/// same class and case; caseless letters become lowercase. The output keeps
/// the character count, not the byte length.
pub fn alphanumeric(value: &str, pepper: &Pepper) -> String {
    let mut keys = KeyStream::new(pepper, "alphanumeric", value);
    value
        .chars()
        .map(|c| {
            if c.is_numeric() {
                (b'0' + keys.below(10) as u8) as char
            } else if c.is_uppercase() {
                (b'A' + keys.below(26) as u8) as char
            } else if c.is_alphabetic() {
                (b'a' + keys.below(26) as u8) as char
            } else {
                c
            }
        })
        .collect()
}

const MAX_DAY_SHIFT: u64 = 365;

/// Shift a `YYYY-MM-DD` date by up to a year either way.
///
/// Anything after the date (a time of day, a zone) is kept as is.
/// PostgreSQL's `infinity` and `-infinity` pass through.
pub fn date_year(value: &str, pepper: &Pepper) -> Result<String, ShapeError> {
    if matches!(value, "infinity" | "-infinity") {
        return Ok(value.to_string());
    }

    let (date_part, rest) = match value.get(..10) {
        Some(date) => (date, &value[10..]),
        None => return Err(ShapeError::new(format!("'{value}' is not a YYYY-MM-DD date"))),
    };
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| ShapeError::new(format!("'{value}' is not a YYYY-MM-DD date: {e}")))?;

    let mut keys = KeyStream::new(pepper, "date_year", value);
    let offset = keys.below(2 * MAX_DAY_SHIFT + 1);
    let shifted = if offset >= MAX_DAY_SHIFT {
        date.checked_add_days(Days::new(offset - MAX_DAY_SHIFT))
    } else {
        date.checked_sub_days(Days::new(MAX_DAY_SHIFT - offset))
    }
    .ok_or_else(|| ShapeError::new(format!("'{value}' cannot be shifted")))?;

    Ok(format!("{}{}", shifted.format("%Y-%m-%d"), rest))
}

const GEOZIP_PREFIX: usize = 3;

/// Keep the leading three digits of a postal code, replace the later digits
pub fn geozip(value: &str, pepper: &Pepper) -> Result<String, ShapeError> {
    let leading = value.chars().take_while(|c| c.is_ascii_digit()).count();
    if leading < GEOZIP_PREFIX {
        return Err(ShapeError::new(format!(
            "'{value}' does not start with {GEOZIP_PREFIX} digits"
        )));
    }

    let mut keys = KeyStream::new(pepper, "geozip", value);
    Ok(value
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i >= GEOZIP_PREFIX && c.is_ascii_digit() {
                (b'0' + keys.below(10) as u8) as char
            } else {
                c
            }
        })
        .collect())
}

/// Which reference list each token of a name draws from
#[derive(Debug, Clone, Copy)]
pub enum NameStyle {
    Given,
    Surname,
    /// Given names, with a surname for the last of several tokens
    Person,
}

/// Replace each whitespace-separated token with a listed name.
///
/// Separators are kept, so the token count and spacing survive.
pub fn name(value: &str, style: NameStyle, pepper: &Pepper) -> String {
    let token_count = value.split_whitespace().count();
    let mut keys = KeyStream::new(pepper, "name", value);
    let mut out = String::with_capacity(value.len());
    let mut token = 0usize;
    let mut in_token = false;

    for c in value.chars() {
        if c.is_whitespace() {
            in_token = false;
            out.push(c);
            continue;
        }
        if in_token {
            continue;
        }
        in_token = true;
        let list = match style {
            NameStyle::Given => GIVEN_NAMES,
            NameStyle::Surname => SURNAMES,
            NameStyle::Person if token_count > 1 && token + 1 == token_count => SURNAMES,
            NameStyle::Person => GIVEN_NAMES,
        };
        out.push_str(list[keys.below(list.len() as u64) as usize]);
        token += 1;
    }

    out
}
