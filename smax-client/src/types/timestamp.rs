//! Timestamp newtype for store write times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Write time of a stored value, in microseconds since the Unix epoch.
///
/// The store reports times as decimal seconds (`"1704067200.123456"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from microseconds since Unix epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the current system time as a timestamp.
    ///
    /// Returns `Timestamp(0)` if system time is before Unix epoch.
    #[must_use]
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(Self(0), |d| {
                Self(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            })
    }

    /// Parses the store's decimal-seconds form without going through a float.
    ///
    /// Fractions beyond microseconds are truncated. Returns `None` for text
    /// that is not a decimal number.
    #[must_use]
    pub fn parse_wire(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let secs: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut micros_text: String = fraction.chars().take(6).collect();
        while micros_text.len() < 6 {
            micros_text.push('0');
        }
        let micros: i64 = micros_text.parse().ok()?;
        let total = secs.checked_mul(1_000_000)?.checked_add(micros)?;
        Some(Self(if negative { -total } else { total }))
    }

    /// Returns the timestamp as microseconds.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Returns the timestamp as fractional seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e6
    }

    /// Converts to a UTC date-time.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:06}", abs / 1_000_000, abs % 1_000_000)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_wire_keeps_microseconds() {
        let ts = Timestamp::parse_wire("1704067200.123456");
        assert_eq!(ts.map(|t| t.as_micros()), Some(1_704_067_200_123_456));
    }

    #[test]
    fn parse_wire_pads_and_truncates() {
        assert_eq!(
            Timestamp::parse_wire("12.5").map(|t| t.as_micros()),
            Some(12_500_000)
        );
        assert_eq!(
            Timestamp::parse_wire("1.1234569").map(|t| t.as_micros()),
            Some(1_123_456)
        );
        assert_eq!(Timestamp::parse_wire("7").map(|t| t.as_micros()), Some(7_000_000));
    }

    #[test]
    fn parse_wire_rejects_garbage() {
        assert!(Timestamp::parse_wire("").is_none());
        assert!(Timestamp::parse_wire("now").is_none());
        assert!(Timestamp::parse_wire("1.2.3").is_none());
    }

    #[test]
    fn display_matches_wire_form() {
        let ts = Timestamp::from_micros(1_704_067_200_000_042);
        assert_eq!(ts.to_string(), "1704067200.000042");
        assert_eq!(Timestamp::parse_wire(&ts.to_string()), Some(ts));
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(Timestamp::now().as_micros() > 0);
    }

    #[test]
    fn datetime_conversion() {
        let ts = Timestamp::from_micros(1_704_067_200_000_000);
        let dt = ts.to_datetime();
        assert_eq!(dt.map(|d| d.to_rfc3339()), Some("2024-01-01T00:00:00+00:00".to_string()));
        assert_eq!(dt.map(Timestamp::from), Some(ts));
    }

    #[test]
    fn timestamps_are_ordered() {
        assert!(Timestamp::from_micros(1) < Timestamp::from_micros(2));
    }

    #[test]
    fn serde_is_transparent() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(&Timestamp::from_micros(12345))?;
        assert_eq!(json, "12345");
        Ok(())
    }
}
