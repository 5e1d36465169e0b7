//! Shared type definitions used by the subscription layer and the replicas.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Resolution Enum
// ============================================================================

/// Price history candle resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    /// 1 minute candles
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    /// 5 minute candles
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minute candles
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 1 hour candles
    #[serde(rename = "1h")]
    OneHour,
    /// 4 hour candles
    #[serde(rename = "4h")]
    FourHours,
    /// 1 day candles
    #[serde(rename = "1d")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Bucket width in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    /// Bucket width in milliseconds, the unit candle timestamps use.
    pub fn millis(&self) -> i64 {
        self.seconds() as i64 * 1_000
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown resolution: {}", s))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_wire_format() {
        assert_eq!(
            serde_json::to_string(&Resolution::FifteenMinutes).unwrap(),
            "\"15m\""
        );
        let r: Resolution = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(r, Resolution::FourHours);
        assert!(serde_json::from_str::<Resolution>("\"2m\"").is_err());
    }

    #[test]
    fn test_resolution_from_str() {
        for r in Resolution::ALL {
            assert_eq!(r.as_str().parse::<Resolution>().unwrap(), r);
        }
        assert!("1w".parse::<Resolution>().is_err());
        assert_eq!(Resolution::default(), Resolution::OneMinute);
        assert_eq!(Resolution::OneHour.millis(), 3_600_000);
    }
}
