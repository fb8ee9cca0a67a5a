use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered identifier of a migration unit.
///
/// Sequential numbers (`0001`) and timestamps (`20240611093000`) are both
/// plain non-negative integers here, so they compare numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Accepts `42`, `0042` and `V42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix('V')
            .or_else(|| digits.strip_prefix('v'))
            .unwrap_or(digits);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid migration version: {s:?}"));
        }
        digits
            .parse::<i64>()
            .map(Version)
            .map_err(|_| format!("migration version out of range: {s:?}"))
    }
}

impl From<Version> for i64 {
    fn from(v: Version) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::Version;

    #[test]
    fn parses_padded_and_prefixed_versions() {
        assert_eq!("0003".parse::<Version>().unwrap(), Version::new(3));
        assert_eq!("V12".parse::<Version>().unwrap(), Version::new(12));
        assert_eq!(
            "20240611093000".parse::<Version>().unwrap().get(),
            20_240_611_093_000
        );
    }

    #[test]
    fn rejects_non_numeric_versions() {
        assert!("".parse::<Version>().is_err());
        assert!("-1".parse::<Version>().is_err());
        assert!("1a".parse::<Version>().is_err());
        assert!("99999999999999999999".parse::<Version>().is_err());
    }

    #[test]
    fn orders_numerically_and_serializes_bare() {
        assert!(Version::new(9) < Version::new(10));
        assert_eq!(Version::new(10).to_string(), "10");
        assert_eq!(serde_json::to_string(&Version::new(4)).unwrap(), "4");
    }
}
