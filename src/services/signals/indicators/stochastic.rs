//! Stochastic Oscillator indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// Stochastic Oscillator.
///
/// Compares closing price to price range over a period:
/// %K = (Current Close - Lowest Low) / (Highest High - Lowest Low) * 100
/// %D = SMA(3) of %K
///
/// Signals:
/// - Below 20: Oversold
/// - Above 80: Overbought
pub struct Stochastic {
    k_period: usize,
    d_period: usize,
}

impl Default for Stochastic {
    fn default() -> Self {
        Self {
            k_period: 14,
            d_period: 3,
        }
    }
}

impl Indicator for Stochastic {
    /// (%K, %D)
    type Output = (f64, f64);

    fn id(&self) -> &str {
        "stochastic"
    }

    fn min_periods(&self) -> usize {
        self.k_period + self.d_period - 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<(f64, f64)> {
        if candles.len() < self.min_periods() {
            return None;
        }

        let k_values: Vec<f64> = candles
            .windows(self.k_period)
            .map(|window| {
                let lowest_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
                let highest_high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
                let current_close = window[window.len() - 1].close;

                if highest_high != lowest_low {
                    (current_close - lowest_low) / (highest_high - lowest_low) * 100.0
                } else {
                    50.0
                }
            })
            .collect();

        if k_values.len() < self.d_period {
            return None;
        }

        let k = *k_values.last()?;
        let d = k_values.iter().rev().take(self.d_period).sum::<f64>() / self.d_period as f64;
        Some((k, d))
    }
}
