//! Twelve Data time-series client.

use super::{finish_candles, get_json, http_client, parse_datetime_ms, parse_number, CandleProvider, FetchFuture, ProviderError};
use crate::types::{Candle, Instrument};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const TWELVE_DATA_URL: &str = "https://api.twelvedata.com/time_series";

/// Twelve Data REST client.
pub struct TwelveDataClient {
    client: Client,
    api_key: String,
    timeout_secs: f64,
}

impl TwelveDataClient {
    pub fn new(api_key: String, timeout_secs: f64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key,
            timeout_secs,
        }
    }

    /// Turn a `time_series` payload into bars.
    ///
    /// Values arrive newest first; errors come back as `{"code": 4xx, "message": ..}`
    /// or `{"status": "error"}` with HTTP 200.
    pub fn parse_response(body: &Value, bars: usize) -> Result<Vec<Candle>, ProviderError> {
        if let Some(code) = body.get("code").and_then(Value::as_i64) {
            if code != 200 {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(if code == 429 {
                    ProviderError::RateLimited(message)
                } else {
                    match u16::try_from(code) {
                        Ok(status) => ProviderError::Http { status, body: message },
                        Err(_) => ProviderError::Malformed(format!("code {}: {}", code, message)),
                    }
                });
            }
        }
        if body.get("status").and_then(Value::as_str) == Some("error") {
            return Err(ProviderError::Malformed("status: error".to_string()));
        }

        let values = body
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Malformed("missing values".to_string()))?;

        let candles = values
            .iter()
            .filter_map(|row| {
                Some(Candle {
                    time: parse_datetime_ms(row.get("datetime")?.as_str()?)?,
                    open: parse_number(row.get("open"))?,
                    high: parse_number(row.get("high"))?,
                    low: parse_number(row.get("low"))?,
                    close: parse_number(row.get("close"))?,
                    volume: parse_number(row.get("volume")),
                })
            })
            .collect();

        finish_candles(candles, bars)
    }
}

impl CandleProvider for TwelveDataClient {
    fn name(&self) -> &str {
        "twelvedata"
    }

    fn fetch<'a>(&'a self, instrument: &'static Instrument, bars: usize) -> FetchFuture<'a> {
        Box::pin(async move {
            debug!("Fetching Twelve Data candles for {}", instrument.symbol);
            let query = [
                ("symbol", instrument.twelve_data.to_string()),
                ("interval", "1min".to_string()),
                ("outputsize", bars.to_string()),
                ("apikey", self.api_key.clone()),
            ];
            let body = get_json(&self.client, TWELVE_DATA_URL, &query, self.timeout_secs).await?;
            Self::parse_response(&body, bars)
        })
    }
}
