//! Average True Range (ATR) indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// ATR (Average True Range) indicator.
///
/// Measures market volatility by calculating the average of true ranges:
/// TR = max(High-Low, |High-PrevClose|, |Low-PrevClose|)
///
/// Reported in price units; callers divide by price for ATR%.
pub struct Atr {
    period: usize,
}

impl Default for Atr {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// True Range of a bar against the previous close.
pub(crate) fn true_range(current: &Candle, previous: &Candle) -> f64 {
    let hl = current.high - current.low;
    let hc = (current.high - previous.close).abs();
    let lc = (current.low - previous.close).abs();
    hl.max(hc).max(lc)
}

impl Indicator for Atr {
    type Output = f64;

    fn id(&self) -> &str {
        "atr"
    }

    fn min_periods(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.min_periods() {
            return None;
        }

        let true_ranges: Vec<f64> = candles.windows(2).map(|w| true_range(&w[1], &w[0])).collect();

        // Wilder's smoothing seeded with the simple average
        let mut atr = true_ranges.iter().take(self.period).sum::<f64>() / self.period as f64;
        for tr in true_ranges.iter().skip(self.period) {
            atr = (atr * (self.period - 1) as f64 + tr) / self.period as f64;
        }

        Some(atr)
    }
}
