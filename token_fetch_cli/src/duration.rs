//! Human-friendly durations such as `15`, `0.5h` or `2 days`

use std::{sync::OnceLock, time::Duration};

use regex::Regex;
use thiserror::Error;

/// A duration argument that could not be understood
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    /// The input is not a number with an optional unit
    #[error("`{0}` is not a duration; expected a number followed by an optional time unit")]
    Malformed(String),
    /// The input is zero or negative
    #[error("duration `{0}` must be greater than zero")]
    NonPositive(String),
    /// The unit is not one of seconds, minutes, hours or days
    #[error("unknown time unit `{unit}` in `{input}`; use seconds, minutes, hours or days")]
    UnknownUnit {
        /// The whole input
        input: String,
        /// The unit that was not recognized
        unit: String,
    },
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(-?(?:\d+\.?\d*|\.\d+))\s*([[:alpha:]]*)\s*$")
            .expect("duration pattern is a valid regex")
    })
}

fn unit_seconds(unit: &str) -> Option<f64> {
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Some(1.),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60.),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3600.),
        "d" | "day" | "days" => Some(86400.),
        _ => None,
    }
}

/// Parses `{number}{unit}`, where a missing unit means seconds
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let caps = pattern()
        .captures(input)
        .ok_or_else(|| DurationError::Malformed(input.to_owned()))?;

    let unit = caps[2].to_ascii_lowercase();
    let scale = unit_seconds(&unit).ok_or_else(|| DurationError::UnknownUnit {
        input: input.to_owned(),
        unit: caps[2].to_owned(),
    })?;

    let magnitude: f64 = caps[1]
        .parse()
        .map_err(|_| DurationError::Malformed(input.to_owned()))?;

    let secs = magnitude * scale;
    if secs <= 0. {
        return Err(DurationError::NonPositive(input.trim().to_owned()));
    }

    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| DurationError::Malformed(input.to_owned()))?;

    // Positive inputs below a nanosecond round down to zero.
    if duration.is_zero() {
        return Err(DurationError::NonPositive(input.trim().to_owned()));
    }

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(input: &str) -> f64 {
        parse_duration(input).unwrap().as_secs_f64()
    }

    #[test]
    fn bare_numbers_are_seconds() {
        assert_eq!(secs("3"), 3.);
        assert_eq!(secs("15"), 15.);
        assert_eq!(secs(".5"), 0.5);
    }

    #[test]
    fn units_scale_the_number() {
        assert_eq!(secs("0.5h"), 1800.);
        assert_eq!(secs("10seconds"), 10.);
        assert_eq!(secs("1.5 min"), 90.);
        assert_eq!(secs("2 days"), 172_800.);
        assert_eq!(secs("4hrs"), 14_400.);
        assert_eq!(secs("1H"), 3600.);
    }

    #[test]
    fn zero_and_negative_are_rejected() {
        assert_eq!(
            parse_duration("0"),
            Err(DurationError::NonPositive("0".to_owned()))
        );
        assert_eq!(
            parse_duration("-5m"),
            Err(DurationError::NonPositive("-5m".to_owned()))
        );
    }

    #[test]
    fn sub_nanosecond_durations_are_rejected() {
        assert_eq!(
            parse_duration("0.0000000001"),
            Err(DurationError::NonPositive("0.0000000001".to_owned()))
        );
        assert_eq!(
            parse_duration("0.000000001"),
            Ok(Duration::from_nanos(1))
        );
    }

    #[test]
    fn unknown_units_are_rejected() {
        for input in ["3weeks", "1 year", "5x"] {
            assert!(
                matches!(parse_duration(input), Err(DurationError::UnknownUnit { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn garbage_is_malformed() {
        for input in ["", "abc", "h", "1.2.3s", "5s later", "1e3"] {
            assert!(
                matches!(parse_duration(input), Err(DurationError::Malformed(_))),
                "{input}"
            );
        }
    }
}
