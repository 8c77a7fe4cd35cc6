//! Broker abstraction — the single opaque "fetch candles for a window" call.
//!
//! The fetch core only needs two things from a broker backend: raw candle
//! rows for a window, and errors inspectable enough to tell an oversized
//! range apart from everything else.

pub mod kite;

pub use kite::KiteClient;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::domain::{Candle, InstrumentToken, Interval};
use crate::fetch::TimeWindow;

/// One candle row as returned by the broker, before conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl From<RawCandle> for Candle {
    fn from(raw: RawCandle) -> Self {
        Candle {
            timestamp: raw.timestamp,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
        }
    }
}

/// Structured errors from a broker backend.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker rejected the requested span as exceeding its per-call
    /// limit. The fetch core recovers from this by bisection.
    #[error("range too large: {0}")]
    RangeTooLarge(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by broker (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Broker-reported application error that is none of the above.
    #[error("broker error ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),
}

impl BrokerError {
    /// The one classification the fetch core special-cases; every other
    /// variant is treated as transient and retried against the attempt
    /// budget.
    pub fn is_range_too_large(&self) -> bool {
        matches!(self, BrokerError::RangeTooLarge(_))
    }
}

/// Data source for historical candles.
pub trait BrokerClient: Send + Sync {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;

    /// Fetch raw candle rows for one instrument over one window.
    fn fetch_candles(
        &self,
        instrument: InstrumentToken,
        interval: Interval,
        window: &TimeWindow,
    ) -> Result<Vec<RawCandle>, BrokerError>;
}
