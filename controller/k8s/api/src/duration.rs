use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A duration in Go's `time.Duration` string format, e.g. `24h` or `1h30m`.
///
/// Mesh configuration and certificate specs carry validity periods in this
/// form.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct GoDuration {
    duration: Duration,
    is_negative: bool,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("duration component out of range")]
    OutOfRange,
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self {
            duration,
            is_negative: false,
        }
    }
}

impl From<GoDuration> for Duration {
    fn from(GoDuration { duration, .. }: GoDuration) -> Self {
        duration
    }
}

impl GoDuration {
    #[inline]
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.is_negative
    }

    /// Returns true if the duration is zero or negative.
    #[inline]
    #[must_use]
    pub fn is_non_positive(&self) -> bool {
        self.is_negative || self.duration.is_zero()
    }
}

impl fmt::Debug for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::fmt::Write;
        if self.is_negative {
            f.write_char('-')?;
        }
        fmt::Debug::fmt(&self.duration, f)
    }
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn unit_duration(unit: &str) -> Result<Duration, ParseError> {
            const MINUTE: Duration = Duration::from_secs(60);
            match unit {
                "ns" => Ok(Duration::from_nanos(1)),
                // U+00B5 is the micro sign; U+03BC is the Greek letter mu.
                "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
                "ms" => Ok(Duration::from_millis(1)),
                "s" => Ok(Duration::from_secs(1)),
                "m" => Ok(MINUTE),
                "h" => Ok(MINUTE * 60),
                _ => Err(ParseError::InvalidUnit),
            }
        }

        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let is_negative = s.starts_with('-');
        let mut rest = s.trim_start_matches(['+', '-']);
        if rest == "0" {
            return Ok(Self {
                duration: Duration::ZERO,
                is_negative,
            });
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            let value = value.parse::<f64>()?;
            if value < 0.0 || !value.is_finite() {
                return Err(ParseError::OutOfRange);
            }
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_end);
            let secs = unit_duration(unit)?.as_secs_f64() * value;
            let component =
                Duration::try_from_secs_f64(secs).map_err(|_| ParseError::OutOfRange)?;
            total = total
                .checked_add(component)
                .ok_or(ParseError::OutOfRange)?;
            rest = tail;
        }

        Ok(Self {
            duration: total,
            is_negative,
        })
    }
}

impl Serialize for GoDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);
    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn parses_go_durations() {
        let cases: &[(&str, Duration)] = &[
            ("0", Duration::ZERO),
            ("5s", Duration::from_secs(5)),
            ("+5s", Duration::from_secs(5)),
            ("5.6s", Duration::from_millis(5600)),
            (".5s", Duration::from_millis(500)),
            ("12µs", Duration::from_micros(12)),
            ("13ms", Duration::from_millis(13)),
            ("24h", 24 * HOUR),
            ("3h30m", 3 * HOUR + 30 * MINUTE),
            ("8760h", 8760 * HOUR),
        ];
        for (input, expected) in cases {
            let parsed = input.parse::<GoDuration>().unwrap();
            assert_eq!(Duration::from(parsed), *expected, "{input}");
            assert!(!parsed.is_negative());
        }
    }

    #[test]
    fn negative_durations_are_flagged() {
        let d = "-2m3.4s".parse::<GoDuration>().unwrap();
        assert!(d.is_negative());
        assert!(d.is_non_positive());
        assert_eq!(
            Duration::from(d),
            2 * MINUTE + Duration::from_millis(3400)
        );
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!("".parse::<GoDuration>(), Err(ParseError::Empty));
        assert_eq!("10".parse::<GoDuration>(), Err(ParseError::NoUnit));
        assert_eq!("10d".parse::<GoDuration>(), Err(ParseError::InvalidUnit));
        assert!(matches!(
            "x1h".parse::<GoDuration>(),
            Err(ParseError::NotANumber(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert_eq!("1h-5m".parse::<GoDuration>(), Err(ParseError::OutOfRange));
        assert_eq!(
            "99999999999999999999h".parse::<GoDuration>(),
            Err(ParseError::OutOfRange)
        );
        assert_eq!(
            "18446744073709551615s1s".parse::<GoDuration>(),
            Err(ParseError::OutOfRange)
        );
        assert!("NaNh".parse::<GoDuration>().is_err());
        assert!("infh".parse::<GoDuration>().is_err());
    }
}
