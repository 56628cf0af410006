//! Trailing window durations.
//!
//! A window is accepted either as a plain number of milliseconds or as a short human-readable
//! duration: `"500"`, `"500ms"`, `"10s"`, `"0.5s"`, `"1.5 hours"`, `"2d"`. Compound durations
//! such as `"1h 30m"` are handed to `humantime`.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SECOND: f64 = 1_000.0;
const MINUTE: f64 = SECOND * 60.0;
const HOUR: f64 = MINUTE * 60.0;
const DAY: f64 = HOUR * 24.0;
const WEEK: f64 = DAY * 7.0;
const YEAR: f64 = DAY * 365.25;

/// Trailing duration over which calls are counted, in whole milliseconds (always > 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "WindowInput"))]
pub struct Window(u64);

impl Window {
    /// Build a window from milliseconds; zero is rejected.
    pub fn from_millis(millis: u64) -> Result<Self, ConfigError> {
        if millis == 0 {
            return Err(ConfigError::InvalidWindow {
                input: millis.to_string(),
                reason: "window must be greater than zero",
            });
        }
        Ok(Self(millis))
    }

    /// Parse a millisecond count or a duration string such as `"10s"` or `"2min 5s"`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let millis = match parse_millis(input) {
            Ok(millis) => millis,
            Err(err) => parse_compound(input).ok_or(err)?,
        };
        if millis == 0 {
            return Err(invalid(input, "window must be greater than zero"));
        }
        Ok(Self(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Default for Window {
    /// One minute.
    fn default() -> Self {
        Self(60_000)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl FromStr for Window {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Window {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Window {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<u64> for Window {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_millis(value)
    }
}

impl TryFrom<Duration> for Window {
    type Error = ConfigError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::from_millis(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Raw window as it appears in a config document: a number of milliseconds or a string.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(untagged)]
pub enum WindowInput {
    /// Milliseconds.
    Millis(u64),
    /// Duration string, parsed with [`Window::parse`].
    Text(String),
}

#[cfg(feature = "serde")]
impl TryFrom<WindowInput> for Window {
    type Error = ConfigError;

    fn try_from(value: WindowInput) -> Result<Self, Self::Error> {
        match value {
            WindowInput::Millis(ms) => Self::from_millis(ms),
            WindowInput::Text(text) => Self::parse(&text),
        }
    }
}

fn invalid(input: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidWindow { input: input.to_string(), reason }
}

fn parse_millis(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty duration"));
    }
    if trimmed.len() > 100 {
        return Err(invalid(input, "duration string too long"));
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(invalid(input, "missing numeric value"));
    }
    if number.ends_with('.') {
        return Err(invalid(input, "malformed number"));
    }
    let value: f64 = number.parse().map_err(|_| invalid(input, "malformed number"))?;

    let factor = match unit.trim_start().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "d" | "day" | "days" => DAY,
        "w" | "week" | "weeks" => WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR,
        _ => return Err(invalid(input, "unknown unit")),
    };

    let millis = (value * factor).round();
    if !millis.is_finite() || millis > u64::MAX as f64 {
        return Err(invalid(input, "duration out of range"));
    }
    Ok(millis as u64)
}

// Single number + unit forms are handled above; "1M" is a minute there, a month here.
fn parse_compound(input: &str) -> Option<u64> {
    let duration = humantime::parse_duration(input.trim()).ok()?;
    u64::try_from(duration.as_millis()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_milliseconds() {
        assert_eq!(Window::parse("1000").unwrap().as_millis(), 1_000);
        assert_eq!(Window::from_millis(250).unwrap().as_millis(), 250);
    }

    #[test]
    fn parses_units() {
        assert_eq!(Window::parse("1s").unwrap().as_millis(), 1_000);
        assert_eq!(Window::parse("10s").unwrap().as_millis(), 10_000);
        assert_eq!(Window::parse("0.5s").unwrap().as_millis(), 500);
        assert_eq!(Window::parse(".5s").unwrap().as_millis(), 500);
        assert_eq!(Window::parse("250ms").unwrap().as_millis(), 250);
        assert_eq!(Window::parse("2m").unwrap().as_millis(), 120_000);
        assert_eq!(Window::parse("1.5 hours").unwrap().as_millis(), 5_400_000);
        assert_eq!(Window::parse("1d").unwrap().as_millis(), 86_400_000);
        assert_eq!(Window::parse("1w").unwrap().as_millis(), 604_800_000);
        assert_eq!(Window::parse("1y").unwrap().as_millis(), 31_557_600_000);
        assert_eq!(Window::parse("3 Secs").unwrap().as_millis(), 3_000);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "   ", "s", "ten seconds", "10 fortnights", "1.2.3s", "-5s", "1.", "1.s", "1h 30"] {
            match Window::parse(bad) {
                Err(ConfigError::InvalidWindow { input, .. }) => assert_eq!(input, bad),
                other => panic!("expected InvalidWindow for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(Window::parse("1h 30m").unwrap().as_millis(), 5_400_000);
        assert_eq!(Window::parse("2min 5s").unwrap().as_millis(), 125_000);
        assert_eq!(Window::parse(" 1s 500ms ").unwrap().as_millis(), 1_500);
        // single-unit strings keep their own meaning
        assert_eq!(Window::parse("1M").unwrap().as_millis(), 60_000);
    }

    #[test]
    fn rejects_zero() {
        assert!(Window::parse("0s").is_err());
        assert!(Window::from_millis(0).is_err());
        assert!(Window::try_from(Duration::ZERO).is_err());
    }

    #[test]
    fn default_is_one_minute() {
        assert_eq!(Window::default().as_duration(), Duration::from_secs(60));
        assert_eq!(Window::default().to_string(), "60000ms");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_numbers_and_strings() {
        let w: Window = serde_json::from_str("1500").unwrap();
        assert_eq!(w.as_millis(), 1_500);
        let w: Window = serde_json::from_str("\"2s\"").unwrap();
        assert_eq!(w.as_millis(), 2_000);
        assert!(serde_json::from_str::<Window>("\"later\"").is_err());
    }
}
