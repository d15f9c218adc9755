//! Bollinger Bands indicator.

use crate::services::signals::Indicator;
use crate::types::Candle;

/// Bollinger Bands indicator.
///
/// Consists of:
/// - Middle band: SMA(20)
/// - Upper band: SMA + 2 * StdDev
/// - Lower band: SMA - 2 * StdDev
///
/// Reports %B scaled to 0..100: 0 sits on the lower band, 100 on the upper.
/// Prices outside the bands give values outside that range.
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
}

impl Default for BollingerBands {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev_multiplier: 2.0,
        }
    }
}

impl BollingerBands {
    /// Calculate population standard deviation.
    fn std_dev(values: &[f64], mean: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    /// (lower, middle, upper) over the newest `period` closes.
    pub fn bands(&self, candles: &[Candle]) -> Option<(f64, f64, f64)> {
        if candles.len() < self.period {
            return None;
        }

        let closes: Vec<f64> = candles
            .iter()
            .rev()
            .take(self.period)
            .map(|c| c.close)
            .collect();

        let middle = closes.iter().sum::<f64>() / self.period as f64;
        let std_dev = Self::std_dev(&closes, middle);

        Some((
            middle - self.std_dev_multiplier * std_dev,
            middle,
            middle + self.std_dev_multiplier * std_dev,
        ))
    }

    /// %B of an arbitrary price against the current bands.
    pub fn position_at(&self, candles: &[Candle], price: f64) -> Option<f64> {
        let (lower, middle, upper) = self.bands(candles)?;
        let band_width = upper - lower;
        // Widths at rounding-noise level read as a flat series.
        if band_width > middle.abs() * 1e-12 {
            Some((price - lower) / band_width * 100.0)
        } else {
            Some(50.0)
        }
    }
}

impl Indicator for BollingerBands {
    type Output = f64;

    fn id(&self) -> &str {
        "bollinger"
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Option<f64> {
        let price = candles.last()?.close;
        self.position_at(candles, price)
    }
}
