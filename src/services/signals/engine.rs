//! Indicator engine.
//!
//! Evaluates the fixed indicator set over a candle series. Each indicator runs
//! independently; one that cannot be computed falls back to its neutral value
//! instead of failing the snapshot. Results are cached by a fingerprint of the
//! newest bars so repeated analysis of unchanged data is free.

use super::indicators::{Adx, Atr, BollingerBands, Macd, Rsi, Stochastic};
use super::Indicator;
use crate::config::SharedConfig;
use crate::services::cache::TtlCache;
use crate::services::metrics::PipelineMetrics;
use crate::types::{Candle, CandleSeries, IndicatorSnapshot};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct IndicatorEngine {
    config: Arc<SharedConfig>,
    metrics: Arc<PipelineMetrics>,
    cache: TtlCache<String, IndicatorSnapshot>,
    rsi: Rsi,
    macd: Macd,
    bollinger: BollingerBands,
    atr: Atr,
    adx: Adx,
    stochastic: Stochastic,
}

/// Hash of the newest `bars` candles' OHLC bit patterns.
pub fn fingerprint(candles: &[Candle], bars: usize) -> String {
    let start = candles.len().saturating_sub(bars);
    let mut hasher = Sha256::new();
    for c in &candles[start..] {
        for v in [c.open, c.high, c.low, c.close] {
            hasher.update(v.to_bits().to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl IndicatorEngine {
    pub fn new(config: Arc<SharedConfig>, metrics: Arc<PipelineMetrics>) -> Self {
        let capacity = config.snapshot().indicators.cache_size;
        Self {
            config,
            metrics,
            cache: TtlCache::new(capacity),
            rsi: Rsi::default(),
            macd: Macd::default(),
            bollinger: BollingerBands::default(),
            atr: Atr::default(),
            adx: Adx::default(),
            stochastic: Stochastic::default(),
        }
    }

    /// Snapshot for a series, served from cache when the newest bars are unchanged.
    pub fn compute(&self, series: &CandleSeries, current_price: f64) -> IndicatorSnapshot {
        let cfg = self.config.snapshot();
        let key = fingerprint(series.candles(), cfg.indicators.fingerprint_bars);

        if let Some(hit) = self.cache.get(&key) {
            debug!("Indicator cache hit for {}", series.symbol);
            self.metrics.record_indicator_cache_hit();
            return hit;
        }

        let snapshot = self.compute_uncached(series.candles(), current_price);

        self.cache.set_capacity(cfg.indicators.cache_size);
        if let Some(evicted) = self.cache.insert(key, snapshot, Duration::from_secs(cfg.indicators.cache_ttl_secs)) {
            debug!("Indicator cache full, evicted {}", &evicted[..12.min(evicted.len())]);
        }
        snapshot
    }

    /// Evaluate every indicator, substituting neutral values for failures.
    pub fn compute_uncached(&self, candles: &[Candle], current_price: f64) -> IndicatorSnapshot {
        let neutral = IndicatorSnapshot::neutral(current_price);
        let mut failed: Vec<&str> = Vec::new();

        let mut pick = |id: &'static str, value: Option<f64>, default: f64| match finite(value) {
            Some(v) => v,
            None => {
                failed.push(id);
                default
            }
        };

        let rsi = pick("rsi", self.rsi.calculate(candles), neutral.rsi);
        let macd_diff = pick("macd", self.macd.calculate(candles), neutral.macd_diff);
        let bb_position = pick("bollinger", self.bollinger.position_at(candles, current_price), neutral.bb_position);
        let adx = pick("adx", self.adx.calculate(candles), neutral.adx);

        let atr_floor = current_price * 0.001;
        let atr = match finite(self.atr.calculate(candles)) {
            Some(v) if v > 0.0 => v,
            _ => atr_floor,
        };

        let (stoch_k, stoch_d) = match self.stochastic.calculate(candles) {
            Some((k, d)) if k.is_finite() && d.is_finite() => (k, d),
            _ => {
                failed.push("stochastic");
                (neutral.stoch_k, neutral.stoch_d)
            }
        };

        if !failed.is_empty() {
            warn!(
                "Indicators unavailable over {} bars, using neutral values: {}",
                candles.len(),
                failed.join(", ")
            );
        }

        IndicatorSnapshot {
            rsi,
            macd_diff,
            bb_position,
            atr,
            adx,
            stoch_k,
            stoch_d,
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
