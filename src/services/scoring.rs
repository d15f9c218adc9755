//! Scoring engine.
//!
//! Turns an indicator snapshot, trend and momentum into a 0..100 directional
//! score (above 50 is bullish) and a confidence value. Also hosts the
//! volatility helpers that size adaptive thresholds and cache lifetimes.

use crate::config::{Config, GatewayConfig, ThresholdConfig};
use crate::types::{
    Action, Candle, IndicatorSnapshot, MomentumDirection, MomentumInfo, ScoreResult, TrendDirection, TrendInfo,
};
use serde::Serialize;
use std::time::Duration;

/// Absolute MACD levels used by trend classification.
const TREND_MACD_MIN: f64 = 0.0001;
const TREND_MACD_STRONG: f64 = 0.0002;
const TREND_MACD_VERY_STRONG: f64 = 0.0003;

/// Momentum moves smaller than this percentage read as neutral.
const MOMENTUM_NEUTRAL_PCT: f64 = 0.01;

/// Volatility band derived from ATR as a percentage of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

/// Score cutoffs for one volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveThresholds {
    pub min_buy_score: f64,
    pub max_sell_score: f64,
    pub regime: VolatilityRegime,
}

pub fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// ATR as a percentage of price. An unusable price reads as 10%.
pub fn volatility_pct(atr: f64, price: f64) -> f64 {
    if price > 0.0 && price.is_finite() && atr.is_finite() {
        atr / price * 100.0
    } else {
        10.0
    }
}

pub fn volatility_regime(atr: f64, price: f64) -> VolatilityRegime {
    let pct = volatility_pct(atr, price);
    if pct > 0.15 {
        VolatilityRegime::High
    } else if pct < 0.05 {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    }
}

/// Buy/sell cutoffs for the current volatility.
pub fn adaptive_thresholds(atr: f64, price: f64) -> AdaptiveThresholds {
    let regime = volatility_regime(atr, price);
    let (min_buy_score, max_sell_score) = match regime {
        VolatilityRegime::High => (60.0, 40.0),
        VolatilityRegime::Low => (52.0, 48.0),
        VolatilityRegime::Normal => (55.0, 45.0),
    };
    AdaptiveThresholds {
        min_buy_score,
        max_sell_score,
        regime,
    }
}

/// How long a candle series stays cached. Never increases with volatility.
pub fn adaptive_cache_ttl(atr: f64, price: f64, cfg: &GatewayConfig) -> Duration {
    let secs = match volatility_regime(atr, price) {
        VolatilityRegime::High => 30,
        VolatilityRegime::Low => 180,
        VolatilityRegime::Normal => cfg.cache_ttl_secs,
    };
    let (lo, hi) = (cfg.cache_min_ttl_secs, cfg.cache_max_ttl_secs.max(cfg.cache_min_ttl_secs));
    Duration::from_secs(secs.clamp(lo, hi))
}

/// Short-term momentum over the last `periods` bars.
pub fn momentum(candles: &[Candle], periods: usize) -> MomentumInfo {
    if periods == 0 || candles.len() < periods + 1 {
        return MomentumInfo::neutral();
    }
    let current = candles[candles.len() - 1].close;
    let past = candles[candles.len() - 1 - periods].close;
    if past == 0.0 || !past.is_finite() || !current.is_finite() {
        return MomentumInfo::neutral();
    }

    let change_pct = (current - past) / past * 100.0;
    let direction = if change_pct > MOMENTUM_NEUTRAL_PCT {
        MomentumDirection::Up
    } else if change_pct < -MOMENTUM_NEUTRAL_PCT {
        MomentumDirection::Down
    } else {
        MomentumDirection::Neutral
    };
    let strength = match direction {
        MomentumDirection::Neutral => 0.0,
        _ => (change_pct.abs() * 100.0).min(100.0),
    };

    MomentumInfo {
        direction,
        change_pct,
        strength,
    }
}

/// Classify the trend from MACD, RSI, ADX and recent price change.
pub fn detect_trend(ind: &IndicatorSnapshot, price_change: f64, th: &ThresholdConfig) -> TrendInfo {
    if ind.adx <= th.adx_trend_threshold {
        return TrendInfo::ranging();
    }

    let macd = ind.macd_diff;
    if macd > TREND_MACD_MIN && ind.rsi > 40.0 && price_change >= 0.0 {
        let strength = if macd > TREND_MACD_VERY_STRONG && ind.rsi > 50.0 {
            80.0
        } else if macd > TREND_MACD_STRONG {
            65.0
        } else {
            55.0
        };
        return TrendInfo {
            direction: TrendDirection::Uptrend,
            strength,
        };
    }

    if macd < -TREND_MACD_MIN && ind.rsi < 60.0 && price_change <= 0.0 {
        let strength = if macd < -TREND_MACD_VERY_STRONG && ind.rsi < 50.0 {
            20.0
        } else if macd < -TREND_MACD_STRONG {
            35.0
        } else {
            45.0
        };
        return TrendInfo {
            direction: TrendDirection::Downtrend,
            strength,
        };
    }

    TrendInfo::ranging()
}

/// Directional TA score in [0, 100].
pub fn ta_score(ind: &IndicatorSnapshot, price_change: f64, trend: &TrendInfo, th: &ThresholdConfig) -> f64 {
    let strong_trend = ind.adx > th.adx_trend_threshold;
    let half_macd = th.macd_strong_threshold / 2.0;

    // In a strong trend, lean with it and nudge
    if strong_trend && trend.direction == TrendDirection::Downtrend {
        let mut score: f64 = 45.0;
        if ind.rsi < 55.0 {
            score -= 3.0;
        }
        if ind.macd_diff < -half_macd {
            score -= 5.0;
        }
        if price_change < 0.0 {
            score -= 4.0;
        }
        if ind.stoch_k > ind.stoch_d {
            score -= 2.0;
        }
        if ind.bb_position > 60.0 {
            score -= 2.0;
        }
        return clamp_score(score);
    }

    if strong_trend && trend.direction == TrendDirection::Uptrend {
        let mut score: f64 = 55.0;
        if ind.rsi > 45.0 {
            score += 3.0;
        }
        if ind.macd_diff > half_macd {
            score += 5.0;
        }
        if price_change > 0.0 {
            score += 4.0;
        }
        if ind.stoch_k < ind.stoch_d {
            score += 2.0;
        }
        if ind.bb_position < 40.0 {
            score += 2.0;
        }
        return clamp_score(score);
    }

    // Ranging or weak trend: count independent confirmations per side
    let buy = [
        ind.rsi < th.rsi_oversold,
        ind.macd_diff > th.macd_strong_threshold,
        ind.bb_position < 25.0,
        ind.stoch_k < 25.0 && ind.stoch_k < ind.stoch_d,
        price_change > 0.0,
        ind.adx > 25.0,
    ]
    .iter()
    .filter(|&&c| c)
    .count();

    let sell = [
        ind.rsi > th.rsi_overbought,
        ind.macd_diff < -th.macd_strong_threshold,
        ind.bb_position > 75.0,
        ind.stoch_k > 75.0 && ind.stoch_k > ind.stoch_d,
        price_change < 0.0,
        ind.adx > 25.0,
    ]
    .iter()
    .filter(|&&c| c)
    .count();

    let mut score: f64 = if buy >= 3 {
        if price_change <= 0.0 { 58.0 } else { 65.0 }
    } else if buy == 2 {
        if price_change <= 0.0 { 53.0 } else { 58.0 }
    } else if sell >= 3 {
        if price_change >= 0.0 { 42.0 } else { 35.0 }
    } else if sell == 2 {
        if price_change >= 0.0 { 47.0 } else { 42.0 }
    } else {
        50.0
    };

    // Secondary adjustments
    if ind.stoch_k < th.stoch_strong_oversold && ind.stoch_k < ind.stoch_d {
        score += 8.0;
    } else if ind.stoch_k < th.stoch_oversold {
        score += 4.0;
    } else if ind.stoch_k > th.stoch_strong_overbought && ind.stoch_k > ind.stoch_d {
        score -= 8.0;
    } else if ind.stoch_k > th.stoch_overbought {
        score -= 4.0;
    }

    if strong_trend {
        if score > 50.0 {
            score += 5.0;
        } else if score < 50.0 {
            score -= 5.0;
        }
    }

    if ind.bb_position < th.bb_strong_oversold {
        score += 7.0;
    } else if ind.bb_position < th.bb_oversold {
        score += 3.0;
    } else if ind.bb_position > th.bb_strong_overbought {
        score -= 7.0;
    } else if ind.bb_position > th.bb_overbought {
        score -= 3.0;
    }

    clamp_score(score)
}

/// Confidence in [40, 95] from how many indicators agree with `action`; 0 for no signal.
pub fn confidence(ind: &IndicatorSnapshot, action: Action, th: &ThresholdConfig) -> f64 {
    let confirmations = match action {
        Action::Buy => [
            ind.rsi < th.rsi_oversold,
            ind.macd_diff > 0.0,
            ind.bb_position < th.bb_oversold,
            ind.stoch_k < th.stoch_oversold,
            ind.adx > th.adx_trend_threshold,
        ],
        Action::Sell => [
            ind.rsi > th.rsi_overbought,
            ind.macd_diff < 0.0,
            ind.bb_position > th.bb_overbought,
            ind.stoch_k > th.stoch_overbought,
            ind.adx > th.adx_trend_threshold,
        ],
        Action::NoSignal => return 0.0,
    }
    .iter()
    .filter(|&&c| c)
    .count();

    let raw = 40.0 + confirmations as f64 / 5.0 * 55.0;
    (raw * 10.0).round() / 10.0
}

/// Bonus points (0..10) when the latest volume runs above its 20-bar mean.
pub fn volume_bonus(candles: &[Candle]) -> f64 {
    const WINDOW: usize = 20;
    if candles.len() < WINDOW {
        return 0.0;
    }
    let recent = &candles[candles.len() - WINDOW..];
    let volumes: Option<Vec<f64>> = recent.iter().map(|c| c.volume.filter(|v| v.is_finite())).collect();
    let Some(volumes) = volumes else {
        return 0.0;
    };

    let avg = volumes.iter().sum::<f64>() / WINDOW as f64;
    let current = volumes[WINDOW - 1];
    if avg <= 0.0 {
        return 0.0;
    }

    let ratio = current / avg;
    if ratio > 2.0 {
        10.0
    } else if ratio > 1.5 {
        7.0
    } else if ratio > 1.2 {
        4.0
    } else if ratio > 1.0 {
        2.0
    } else {
        0.0
    }
}

/// Scoring rules bound to one configuration snapshot.
pub struct ScoringEngine<'a> {
    config: &'a Config,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Score a snapshot. Confidence is measured for the side the score leans to.
    pub fn score(&self, ind: &IndicatorSnapshot, momentum: MomentumInfo, trend: TrendInfo) -> ScoreResult {
        let th = &self.config.thresholds;
        let ta_score = ta_score(ind, momentum.change_pct, &trend, th);
        ScoreResult {
            ta_score,
            confidence: confidence(ind, leaning(ta_score), th),
            trend,
            momentum,
        }
    }

    /// Trend and momentum for a series, then its score.
    pub fn evaluate(&self, candles: &[Candle], ind: &IndicatorSnapshot) -> ScoreResult {
        let momentum = momentum(candles, self.config.indicators.momentum_periods);
        let trend = detect_trend(ind, momentum.change_pct, &self.config.thresholds);
        self.score(ind, momentum, trend)
    }
}

/// Which side a score leans to; exactly 50 leans nowhere.
pub fn leaning(score: f64) -> Action {
    if score > 50.0 {
        Action::Buy
    } else if score < 50.0 {
        Action::Sell
    } else {
        Action::NoSignal
    }
}
