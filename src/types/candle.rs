use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum number of cleaned bars a series needs to be usable.
pub const MIN_SERIES_LEN: usize = 10;

/// OHLCV bar. `time` is the bar open in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Candle {
    /// True when every price field is finite.
    pub fn is_complete(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Immutable, time-ordered candles for one instrument.
///
/// Cloning is cheap: the bars are shared behind an `Arc` so cache hits hand out
/// the same allocation instead of copying.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSeries {
    pub symbol: String,
    pub source: String,
    candles: Arc<Vec<Candle>>,
}

impl CandleSeries {
    /// Build a series, sorting by time and keeping only the newest `max_len` bars.
    pub fn new(symbol: impl Into<String>, source: impl Into<String>, mut candles: Vec<Candle>, max_len: usize) -> Self {
        candles.retain(Candle::is_complete);
        candles.sort_by_key(|c| c.time);
        if candles.len() > max_len {
            candles.drain(..candles.len() - max_len);
        }
        Self {
            symbol: symbol.into(),
            source: source.into(),
            candles: Arc::new(candles),
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Whether the series has enough bars for indicator work.
    pub fn is_usable(&self) -> bool {
        self.candles.len() >= MIN_SERIES_LEN
    }

    /// Close of the newest bar.
    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// The newest `n` bars (or all of them if fewer).
    pub fn tail(&self, n: usize) -> &[Candle] {
        let start = self.candles.len().saturating_sub(n);
        &self.candles[start..]
    }

    /// Fractional close-to-close change over the last `periods` bars.
    pub fn price_change(&self, periods: usize) -> f64 {
        let len = self.candles.len();
        if len <= periods || periods == 0 {
            return 0.0;
        }
        let past = self.candles[len - 1 - periods].close;
        let now = self.candles[len - 1].close;
        if past == 0.0 {
            0.0
        } else {
            (now - past) / past
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Candle {
        Candle {
            time,
            open: close,
            high: close + 0.001,
            low: close - 0.001,
            close,
            volume: Some(1000.0),
        }
    }

    #[test]
    fn test_series_sorts_and_trims() {
        let candles = (0..80).rev().map(|i| bar(i * 60_000, 1.0 + i as f64 * 0.001)).collect();
        let series = CandleSeries::new("EURUSD", "test", candles, 60);
        assert_eq!(series.len(), 60);
        assert!(series.candles().windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(series.candles().last().unwrap().time, 79 * 60_000);
    }

    #[test]
    fn test_series_serializes_shared_bars() {
        let series = CandleSeries::new("EURUSD", "test", vec![bar(0, 1.08), bar(60_000, 1.09)], 60);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json["symbol"], "EURUSD");
        assert_eq!(json["candles"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_series_drops_incomplete_rows() {
        let mut candles: Vec<Candle> = (0..12).map(|i| bar(i, 1.0)).collect();
        candles[3].close = f64::NAN;
        candles[5].high = f64::INFINITY;
        let series = CandleSeries::new("EURUSD", "test", candles, 60);
        assert_eq!(series.len(), 10);
        assert!(series.is_usable());
    }

    #[test]
    fn test_price_change() {
        let candles = vec![bar(0, 100.0), bar(1, 101.0), bar(2, 102.0), bar(3, 104.0)];
        let series = CandleSeries::new("XAUUSD", "test", candles, 60);
        assert!((series.price_change(3) - 0.04).abs() < 1e-12);
        assert_eq!(series.price_change(10), 0.0);
    }

    #[test]
    fn test_tail() {
        let candles = (0..20).map(|i| bar(i, 1.0)).collect();
        let series = CandleSeries::new("EURUSD", "test", candles, 60);
        assert_eq!(series.tail(15).len(), 15);
        assert_eq!(series.tail(50).len(), 20);
        assert_eq!(series.tail(15)[0].time, 5);
    }
}
