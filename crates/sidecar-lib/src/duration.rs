//! Duration parsing for configuration strings
//!
//! Accepts the compact span notation used in the sidecar configuration,
//! e.g. `"10m"`, `"90s"`, `"1h 30m"`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DurationParseError {
    #[error("invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("empty duration string")]
    EmptyString,
}

/// Parses a duration string into a [`Duration`].
///
/// Supported units are `ms`, `s`, `m`, `h` and `d`; multiple terms add up,
/// so `"1h 30m"` is ninety minutes.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationParseError::EmptyString);
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut unit = String::new();

    let mut flush = |number: &mut String, unit: &mut String| -> Result<(), DurationParseError> {
        if number.is_empty() {
            return Err(DurationParseError::InvalidFormat(input.to_string()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(number.clone()))?;
        let millis = match unit.as_str() {
            "ms" => value,
            "s" => value * 1_000.0,
            "m" => value * 60_000.0,
            "h" => value * 3_600_000.0,
            "d" => value * 86_400_000.0,
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };
        if millis < 0.0 {
            return Err(DurationParseError::InvalidFormat(input.to_string()));
        }
        total += Duration::from_millis(millis as u64);
        number.clear();
        unit.clear();
        Ok(())
    };

    for ch in input.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            if !unit.is_empty() {
                flush(&mut number, &mut unit)?;
            }
            number.push(ch);
        } else if ch.is_ascii_alphabetic() {
            if number.is_empty() {
                return Err(DurationParseError::InvalidFormat(input.to_string()));
            }
            unit.push(ch);
        } else if ch.is_whitespace() {
            if !unit.is_empty() {
                flush(&mut number, &mut unit)?;
            } else if !number.is_empty() {
                return Err(DurationParseError::InvalidFormat(input.to_string()));
            }
        } else {
            return Err(DurationParseError::InvalidFormat(input.to_string()));
        }
    }
    flush(&mut number, &mut unit)?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_terms() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("3d").unwrap(), Duration::from_secs(259_200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn parses_combined_terms() {
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parses_fractional_values() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_duration(""), Err(DurationParseError::EmptyString));
        assert_eq!(
            parse_duration("10"),
            Err(DurationParseError::UnknownUnit(String::new()))
        );
        assert!(matches!(
            parse_duration("tens"),
            Err(DurationParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_duration("10q"),
            Err(DurationParseError::UnknownUnit(_))
        ));
    }
}
