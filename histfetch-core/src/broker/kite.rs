//! Kite Connect historical data client.
//!
//! Wraps `GET /instruments/historical/{token}/{interval}`. The endpoint
//! enforces a per-call span ceiling on intraday granularities and reports it
//! with a recognizable error message, which this client surfaces as
//! [`BrokerError::RangeTooLarge`] so the fetch core can bisect.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::time::Duration;

use crate::auth::Credentials;
use crate::domain::{InstrumentToken, Interval};
use crate::fetch::TimeWindow;

use super::{BrokerClient, BrokerError, RawCandle};

pub const DEFAULT_BASE_URL: &str = "https://api.kite.trade";

/// Error messages the endpoint uses for an oversized window.
const RANGE_TOO_LARGE_SIGNATURES: &[&str] =
    &["interval exceeds max limit", "too many candles requested"];

/// Top-level response envelope: `status` is "success" or "error".
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    candles: Vec<CandleRow>,
}

/// Positional candle row: `[timestamp, open, high, low, close, volume]`.
#[derive(Debug)]
struct CandleRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

impl<'de> Deserialize<'de> for CandleRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        struct RowVisitor;

        impl<'de> serde::de::Visitor<'de> for RowVisitor {
            type Value = CandleRow;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a candle array [timestamp, open, high, low, close, volume]")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let timestamp = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("timestamp"))?;
                let open = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("open"))?;
                let high = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("high"))?;
                let low = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("low"))?;
                let close = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("close"))?;
                let volume = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::missing_field("volume"))?;

                // Ignore any trailing elements (e.g. open interest).
                while seq
                    .next_element::<serde::de::IgnoredAny>()?
                    .is_some()
                {}

                Ok(CandleRow {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            }
        }

        deserializer.deserialize_seq(RowVisitor)
    }
}

/// Blocking REST client for the Kite historical endpoint.
pub struct KiteClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

impl KiteClient {
    pub fn new(credentials: &Credentials) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(credentials: &Credentials, base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            access_token: credentials.access_token.clone(),
        }
    }
}

impl BrokerClient for KiteClient {
    fn name(&self) -> &str {
        "kite"
    }

    fn fetch_candles(
        &self,
        instrument: InstrumentToken,
        interval: Interval,
        window: &TimeWindow,
    ) -> Result<Vec<RawCandle>, BrokerError> {
        let url = format!(
            "{}/instruments/historical/{}/{}",
            self.base_url,
            instrument,
            interval.api_param()
        );
        // Wire bounds are inclusive; the half-open end maps to end - 1s.
        let from = window.start().format("%Y-%m-%d %H:%M:%S").to_string();
        let to = (window.end() - chrono::Duration::seconds(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("from", from.as_str()), ("to", to.as_str())])
            .header("X-Kite-Version", "3")
            .header(
                "Authorization",
                format!("token {}:{}", self.api_key, self.access_token),
            )
            .send()
            .map_err(|e| BrokerError::NetworkUnreachable(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(BrokerError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let body = response
            .text()
            .map_err(|e| BrokerError::NetworkUnreachable(e.to_string()))?;

        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            let message = serde_json::from_str::<ApiEnvelope>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(BrokerError::AuthenticationFailed(message));
        }

        if !status.is_success() {
            // An oversized range comes back as a client error with a
            // recognizable message, so the body still needs parsing.
            return match serde_json::from_str::<ApiEnvelope>(&body) {
                Ok(envelope) => Err(error_from_envelope(envelope)),
                Err(_) => Err(BrokerError::Http {
                    status: status.as_u16(),
                    message: body,
                }),
            };
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body)
            .map_err(|e| BrokerError::ResponseFormatChanged(format!("parse response: {e}")))?;
        parse_envelope(envelope)
    }
}

fn parse_envelope(envelope: ApiEnvelope) -> Result<Vec<RawCandle>, BrokerError> {
    if envelope.status != "success" {
        return Err(error_from_envelope(envelope));
    }
    let data = envelope
        .data
        .ok_or_else(|| BrokerError::ResponseFormatChanged("success with no data".into()))?;
    data.candles.into_iter().map(raw_from_row).collect()
}

fn raw_from_row(row: CandleRow) -> Result<RawCandle, BrokerError> {
    let timestamp = parse_timestamp(&row.timestamp)?;
    Ok(RawCandle {
        timestamp,
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        volume: row.volume,
    })
}

/// Candle timestamps arrive with a fixed offset, e.g. `2023-01-02T09:15:00+0530`.
fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BrokerError> {
    chrono::DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| BrokerError::ResponseFormatChanged(format!("invalid timestamp '{s}': {e}")))
}

fn error_from_envelope(envelope: ApiEnvelope) -> BrokerError {
    let message = envelope
        .message
        .unwrap_or_else(|| "unknown broker error".to_string());
    let error_type = envelope
        .error_type
        .unwrap_or_else(|| "GeneralException".to_string());

    let lower = message.to_ascii_lowercase();
    if RANGE_TOO_LARGE_SIGNATURES
        .iter()
        .any(|sig| lower.contains(sig))
    {
        return BrokerError::RangeTooLarge(message);
    }
    if error_type == "TokenException" || error_type == "PermissionException" {
        return BrokerError::AuthenticationFailed(message);
    }
    BrokerError::Api {
        error_type,
        message,
    }
}
