//! MACD (Moving Average Convergence Divergence) indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// MACD indicator.
///
/// Shows the relationship between two EMAs:
/// - MACD Line = EMA(12) - EMA(26)
/// - Signal Line = EMA(9) of MACD Line
/// - Histogram = MACD Line - Signal Line
///
/// `calculate` returns the histogram (the line/signal difference).
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

/// EMA seeded with the SMA of the first `period` values.
pub(crate) fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = Vec::with_capacity(values.len() - period + 1);

    let mut prev = values.iter().take(period).sum::<f64>() / period as f64;
    ema.push(prev);

    for value in &values[period..] {
        prev = (value - prev) * multiplier + prev;
        ema.push(prev);
    }

    ema
}

impl Indicator for Macd {
    type Output = f64;

    fn id(&self) -> &str {
        "macd"
    }

    fn min_periods(&self) -> usize {
        self.slow_period + self.signal_period
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.min_periods() {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let fast_ema = ema_series(&closes, self.fast_period);
        let slow_ema = ema_series(&closes, self.slow_period);

        // Align the EMAs (fast starts earlier)
        let offset = self.slow_period - self.fast_period;
        let macd_line: Vec<f64> = fast_ema
            .iter()
            .skip(offset)
            .zip(slow_ema.iter())
            .map(|(f, s)| f - s)
            .collect();

        let signal_line = ema_series(&macd_line, self.signal_period);

        let macd = *macd_line.last()?;
        let signal = *signal_line.last()?;
        Some(macd - signal)
    }
}
