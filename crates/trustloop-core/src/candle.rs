//! OHLC candles used for counterfactual replay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Price, Size};

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Interval {
    pub fn as_millis(&self) -> u64 {
        match self {
            Self::OneMinute => 60_000,
            Self::FiveMinutes => 300_000,
            Self::FifteenMinutes => 900_000,
            Self::OneHour => 3_600_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
        }
    }

    /// Bars needed to cover `span_ms`, rounded up.
    pub fn bars_in(&self, span_ms: u64) -> u64 {
        span_ms.div_ceil(self.as_millis())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            other => Err(format!("unsupported interval: {other}")),
        }
    }
}

/// One OHLC bar. `ts_ms` is the bar open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub ts_ms: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    #[serde(default = "zero_volume")]
    pub volume: Size,
}

fn zero_volume() -> Size {
    Size::ZERO
}

impl Candle {
    #[must_use]
    pub fn new(ts_ms: u64, open: Price, high: Price, low: Price, close: Price) -> Self {
        Self {
            ts_ms,
            open,
            high,
            low,
            close,
            volume: Size::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parse_and_bars() {
        let interval: Interval = "1m".parse().unwrap();
        assert_eq!(interval, Interval::OneMinute);
        assert_eq!(interval.bars_in(240 * 60_000), 240);
        assert_eq!(interval.bars_in(60_001), 2);
        assert!("2d".parse::<Interval>().is_err());
    }
}
