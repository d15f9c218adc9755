//! Technical indicators and the engine that evaluates them.

pub mod engine;
pub mod indicators;

pub use engine::IndicatorEngine;

use crate::types::Candle;

/// Trait for implementing technical indicators.
pub trait Indicator: Send + Sync {
    type Output;

    /// Unique identifier for this indicator.
    fn id(&self) -> &str;

    /// Minimum number of candle periods required for calculation.
    fn min_periods(&self) -> usize;

    /// Calculate the indicator from OHLC candle data.
    /// Returns None if insufficient data or calculation fails.
    fn calculate(&self, candles: &[Candle]) -> Option<Self::Output>;
}
