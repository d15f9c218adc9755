use super::{finish_candles, get_json, http_client, parse_number, CandleProvider, FetchFuture, ProviderError};
use crate::types::{Candle, Instrument};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const BINANCE_API_URL: &str = "https://api.binance.com/api/v3";

/// Binance REST client. Klines are public, so no key is needed.
pub struct BinanceClient {
    client: Client,
    timeout_secs: f64,
}

impl BinanceClient {
    /// Create a new Binance client.
    pub fn new(timeout_secs: f64) -> Self {
        Self {
            client: http_client(timeout_secs),
            timeout_secs,
        }
    }

    /// Parse a klines array: `[openTime, "open", "high", "low", "close", "volume", ...]`.
    pub fn parse_klines(body: &Value, bars: usize) -> Result<Vec<Candle>, ProviderError> {
        if let Some(msg) = body.get("msg").and_then(Value::as_str) {
            let code = body.get("code").and_then(Value::as_i64).unwrap_or_default();
            return Err(ProviderError::Malformed(format!("code {}: {}", code, msg)));
        }

        let rows = body
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("expected kline array".to_string()))?;

        let candles = rows
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                Some(Candle {
                    time: row.first()?.as_i64()?,
                    open: parse_number(row.get(1))?,
                    high: parse_number(row.get(2))?,
                    low: parse_number(row.get(3))?,
                    close: parse_number(row.get(4))?,
                    volume: parse_number(row.get(5)),
                })
            })
            .collect();

        finish_candles(candles, bars)
    }
}

impl CandleProvider for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    fn fetch<'a>(&'a self, instrument: &'static Instrument, bars: usize) -> FetchFuture<'a> {
        Box::pin(async move {
            let pair = instrument
                .binance
                .ok_or_else(|| ProviderError::NotConfigured(instrument.symbol.to_string()))?;
            debug!("Fetching Binance klines for {} ({})", instrument.symbol, pair);

            let url = format!("{}/klines", BINANCE_API_URL);
            let query = [
                ("symbol", pair.to_string()),
                ("interval", "1m".to_string()),
                ("limit", bars.min(1000).to_string()),
            ];
            let body = get_json(&self.client, &url, &query, self.timeout_secs).await?;
            Self::parse_klines(&body, bars)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn klines(count: usize) -> Value {
        let rows: Vec<Value> = (0..count)
            .map(|i| {
                json!([
                    1_700_000_000_000i64 + i as i64 * 60_000,
                    "1.08000", "1.08050", "1.07950",
                    format!("{:.5}", 1.08 + i as f64 * 0.00001),
                    "1523.4", 1_700_000_059_999i64, "0", 10, "0", "0", "0"
                ])
            })
            .collect();
        Value::Array(rows)
    }

    #[test]
    fn test_parse_klines() {
        let candles = BinanceClient::parse_klines(&klines(60), 60).unwrap();
        assert_eq!(candles.len(), 60);
        assert_eq!(candles[0].time, 1_700_000_000_000);
        assert_eq!(candles[0].volume, Some(1523.4));
        assert!((candles[59].close - 1.08059).abs() < 1e-9);
    }

    #[test]
    fn test_parse_error_object() {
        let body = json!({ "code": -1121, "msg": "Invalid symbol." });
        let err = BinanceClient::parse_klines(&body, 60).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(m) if m.contains("Invalid symbol")));
    }

    #[test]
    fn test_parse_short_series() {
        let err = BinanceClient::parse_klines(&klines(5), 60).unwrap_err();
        assert_eq!(err, ProviderError::InsufficientData { got: 5 });
    }

    #[tokio::test]
    async fn test_unmapped_instrument_not_configured() {
        let client = BinanceClient::new(1.0);
        let jpy = crate::types::lookup("USDJPY").unwrap();
        let err = client.fetch(jpy, 60).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_transient());
    }
}
