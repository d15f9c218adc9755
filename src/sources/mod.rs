//! Candle data providers.
//!
//! Each provider turns one HTTP endpoint into a list of cleaned 1-minute bars.
//! Payload shape differences (keyed object vs. list of arrays, numeric strings)
//! are absorbed here; the gateway only ever sees `Vec<Candle>`.

pub mod alphavantage;
pub mod binance;
pub mod twelvedata;

pub use alphavantage::AlphaVantageClient;
pub use binance::BinanceClient;
pub use twelvedata::TwelveDataClient;

use crate::types::{Candle, Instrument, MIN_SERIES_LEN};
use chrono::NaiveDateTime;
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Provider-level failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:.1}s")]
    Timeout(f64),

    #[error("only {got} usable bars")]
    InsufficientData { got: usize },

    #[error("not configured for {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http { .. }
                | ProviderError::RateLimited(_)
                | ProviderError::Malformed(_)
                | ProviderError::Transport(_)
                | ProviderError::Timeout(_)
                | ProviderError::InsufficientData { .. }
        )
    }
}

/// Boxed future returned by [`CandleProvider::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Candle>, ProviderError>> + Send + 'a>>;

/// A source of recent 1-minute candles.
pub trait CandleProvider: Send + Sync {
    /// Short identifier used in logs, metrics and `DATA_SOURCE`.
    fn name(&self) -> &str;

    /// Fetch up to `bars` recent bars, oldest first.
    fn fetch<'a>(&'a self, instrument: &'static Instrument, bars: usize) -> FetchFuture<'a>;
}

/// Build a shared HTTP client with a request timeout.
pub(crate) fn http_client(timeout_secs: f64) -> Client {
    Client::builder()
        .user_agent("Omen/1.0")
        .timeout(Duration::from_secs_f64(timeout_secs.max(0.1)))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// GET a JSON document, mapping transport and status failures.
pub(crate) async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    timeout_secs: f64,
) -> Result<Value, ProviderError> {
    let response = client.get(url).query(query).send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(timeout_secs)
        } else {
            ProviderError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Read a number that may arrive as a JSON number or a numeric string.
pub(crate) fn parse_number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse `YYYY-MM-DD HH:MM:SS` (or a bare date) as UTC milliseconds.
pub(crate) fn parse_datetime_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Sort, drop incomplete rows, keep the newest `bars` and require a usable length.
pub(crate) fn finish_candles(mut candles: Vec<Candle>, bars: usize) -> Result<Vec<Candle>, ProviderError> {
    candles.retain(Candle::is_complete);
    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    if candles.len() > bars {
        candles.drain(..candles.len() - bars);
    }
    if candles.len() < MIN_SERIES_LEN {
        return Err(ProviderError::InsufficientData { got: candles.len() });
    }
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Http { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Timeout(10.0).is_transient());
        assert!(ProviderError::Malformed("x".into()).is_transient());
        assert!(ProviderError::InsufficientData { got: 3 }.is_transient());
        assert!(!ProviderError::NotConfigured("USDJPY".into()).is_transient());
    }

    #[test]
    fn test_parse_number_coerces_strings() {
        assert_eq!(parse_number(Some(&json!("1.0850"))), Some(1.085));
        assert_eq!(parse_number(Some(&json!(2700.5))), Some(2700.5));
        assert_eq!(parse_number(Some(&json!("n/a"))), None);
        assert_eq!(parse_number(Some(&json!(null))), None);
        assert_eq!(parse_number(None), None);
    }

    #[test]
    fn test_parse_datetime() {
        assert_eq!(parse_datetime_ms("1970-01-01 00:01:00"), Some(60_000));
        assert_eq!(parse_datetime_ms("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_datetime_ms("yesterday"), None);
    }

    #[test]
    fn test_finish_candles_requires_ten_bars() {
        let bar = |t: i64| Candle { time: t, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: None };
        let err = finish_candles((0..9).map(bar).collect(), 60).unwrap_err();
        assert_eq!(err, ProviderError::InsufficientData { got: 9 });

        let ok = finish_candles((0..80).rev().map(bar).collect(), 60).unwrap();
        assert_eq!(ok.len(), 60);
        assert_eq!(ok[0].time, 20);
    }
}
