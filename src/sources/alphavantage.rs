//! Alpha Vantage FX intraday client.
//!
//! Note: the free tier allows 25 requests/day and 5/minute, so throttling
//! replies ("Note", "Information") are common and reported as rate limits.

use super::{finish_candles, get_json, http_client, parse_datetime_ms, parse_number, CandleProvider, FetchFuture, ProviderError};
use crate::types::{Candle, Instrument};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
const SERIES_KEY: &str = "Time Series FX (1min)";

/// Alpha Vantage API client.
pub struct AlphaVantageClient {
    client: Client,
    api_key: String,
    timeout_secs: f64,
}

impl AlphaVantageClient {
    /// Create a new Alpha Vantage client.
    pub fn new(api_key: String, timeout_secs: f64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key,
            timeout_secs,
        }
    }

    /// Parse the keyed `FX_INTRADAY` object.
    pub fn parse_response(body: &Value, bars: usize) -> Result<Vec<Candle>, ProviderError> {
        if let Some(msg) = body.get("Error Message").and_then(Value::as_str) {
            return Err(ProviderError::Malformed(msg.to_string()));
        }
        for key in ["Note", "Information"] {
            if let Some(msg) = body.get(key).and_then(Value::as_str) {
                return Err(ProviderError::RateLimited(msg.to_string()));
            }
        }

        let series = body
            .get(SERIES_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| ProviderError::Malformed(format!("missing {}", SERIES_KEY)))?;

        let candles = series
            .iter()
            .filter_map(|(stamp, row)| {
                Some(Candle {
                    time: parse_datetime_ms(stamp)?,
                    open: parse_number(row.get("1. open"))?,
                    high: parse_number(row.get("2. high"))?,
                    low: parse_number(row.get("3. low"))?,
                    close: parse_number(row.get("4. close"))?,
                    volume: parse_number(row.get("5. volume")),
                })
            })
            .collect();

        finish_candles(candles, bars)
    }
}

impl CandleProvider for AlphaVantageClient {
    fn name(&self) -> &str {
        "alphavantage"
    }

    fn fetch<'a>(&'a self, instrument: &'static Instrument, bars: usize) -> FetchFuture<'a> {
        Box::pin(async move {
            debug!("Fetching Alpha Vantage candles for {}", instrument.symbol);
            let outputsize = if bars > 100 { "full" } else { "compact" };
            let query = [
                ("function", "FX_INTRADAY".to_string()),
                ("from_symbol", instrument.base.to_string()),
                ("to_symbol", instrument.quote.to_string()),
                ("interval", "1min".to_string()),
                ("outputsize", outputsize.to_string()),
                ("apikey", self.api_key.clone()),
            ];
            let body = get_json(&self.client, ALPHA_VANTAGE_URL, &query, self.timeout_secs).await?;
            Self::parse_response(&body, bars)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn payload(count: usize) -> Value {
        let mut series = Map::new();
        for i in 0..count {
            series.insert(
                format!("2024-03-01 09:{:02}:00", i),
                json!({
                    "1. open": "2700.10",
                    "2. high": "2701.00",
                    "3. low": "2699.50",
                    "4. close": format!("{:.2}", 2700.0 + i as f64),
                }),
            );
        }
        let mut body = Map::new();
        body.insert("Meta Data".to_string(), json!({}));
        body.insert(SERIES_KEY.to_string(), Value::Object(series));
        Value::Object(body)
    }

    #[test]
    fn test_parse_keyed_series() {
        let candles = AlphaVantageClient::parse_response(&payload(20), 60).unwrap();
        assert_eq!(candles.len(), 20);
        assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
        assert_eq!(candles.last().unwrap().close, 2719.0);
    }

    #[test]
    fn test_parse_keeps_tail() {
        let candles = AlphaVantageClient::parse_response(&payload(50), 15).unwrap();
        assert_eq!(candles.len(), 15);
        assert_eq!(candles[0].close, 2735.0);
    }

    #[test]
    fn test_parse_error_fields() {
        let err = AlphaVantageClient::parse_response(&json!({"Error Message": "Invalid API call"}), 60).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));

        let err = AlphaVantageClient::parse_response(&json!({"Note": "Thank you for using Alpha Vantage"}), 60).unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));

        let err = AlphaVantageClient::parse_response(&json!({"Information": "premium endpoint"}), 60).unwrap_err();
        assert!(err.is_transient());
    }
}
