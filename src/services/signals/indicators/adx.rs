//! Average Directional Index (ADX) indicator.

use super::atr::true_range;
use crate::services::signals::Indicator;
use crate::types::Candle;

/// ADX (Average Directional Index) indicator.
///
/// Measures trend strength (not direction):
/// - Below 20: Weak trend / ranging market
/// - 20-40: Trending
/// - Above 40: Strong trend
pub struct Adx {
    period: usize,
}

impl Default for Adx {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Adx {
    /// Calculate smoothed moving average (Wilder's smoothing).
    fn wilders_smooth(values: &[f64], period: usize) -> Vec<f64> {
        if values.len() < period {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(values.len() - period + 1);
        let mut prev = values.iter().take(period).sum::<f64>() / period as f64;
        result.push(prev);

        for value in values.iter().skip(period) {
            prev = (prev * (period - 1) as f64 + value) / period as f64;
            result.push(prev);
        }

        result
    }
}

impl Indicator for Adx {
    type Output = f64;

    fn id(&self) -> &str {
        "adx"
    }

    fn min_periods(&self) -> usize {
        self.period * 2 + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.min_periods() {
            return None;
        }

        let mut plus_dm = Vec::with_capacity(candles.len());
        let mut minus_dm = Vec::with_capacity(candles.len());
        let mut tr = Vec::with_capacity(candles.len());

        for w in candles.windows(2) {
            let (previous, current) = (&w[0], &w[1]);

            let up_move = current.high - previous.high;
            let down_move = previous.low - current.low;

            plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
            minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
            tr.push(true_range(current, previous));
        }

        let smoothed_plus_dm = Self::wilders_smooth(&plus_dm, self.period);
        let smoothed_minus_dm = Self::wilders_smooth(&minus_dm, self.period);
        let smoothed_tr = Self::wilders_smooth(&tr, self.period);

        let dx_values: Vec<f64> = smoothed_tr
            .iter()
            .zip(smoothed_plus_dm.iter().zip(smoothed_minus_dm.iter()))
            .map(|(&atr, (&pdm, &mdm))| {
                if atr == 0.0 {
                    return 0.0;
                }
                let plus_di = pdm / atr * 100.0;
                let minus_di = mdm / atr * 100.0;
                let di_sum = plus_di + minus_di;
                if di_sum > 0.0 {
                    (plus_di - minus_di).abs() / di_sum * 100.0
                } else {
                    0.0
                }
            })
            .collect();

        Self::wilders_smooth(&dx_values, self.period).last().copied()
    }
}
