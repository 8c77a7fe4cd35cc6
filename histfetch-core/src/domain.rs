//! Domain types shared by the fetch engine, broker client, and sinks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broker-assigned numeric identifier for a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentToken(pub i64);

impl fmt::Display for InstrumentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single OHLCV candlestick.
///
/// Produced by the fetch engine from raw broker rows; never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Candle granularity accepted by the broker's historical endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
}

impl Interval {
    /// The spelling the broker API expects in the request path.
    pub fn api_param(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Hour => "60minute",
            Interval::Day => "day",
        }
    }

    /// Sub-day granularities are subject to the broker's per-call span
    /// ceiling; daily candles are not.
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Interval::Day)
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Interval::Minute),
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            other => Err(format!(
                "invalid interval '{other}' (expected minute, hour, or day)"
            )),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interval::Minute => "minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
        };
        write!(f, "{name}")
    }
}
