//! Decision engine.
//!
//! Runs one analysis cycle for an instrument:
//! `FETCH -> INDICATORS -> CANDIDATE -> (ADVISORY) -> FINALIZE`.
//! Every failure degrades to a `NO_SIGNAL` directive; nothing escapes to the caller.

use crate::config::{Config, ExpirationConfig, RiskConfig, SharedConfig};
use crate::error::{AppError, Result};
use crate::services::advisory::{AdvisoryLayer, AdvisoryRequest};
use crate::services::market_data::MarketDataGateway;
use crate::services::metrics::PipelineMetrics;
use crate::services::scoring::{
    adaptive_thresholds, clamp_score, confidence, leaning, volatility_pct, volume_bonus, ScoringEngine,
};
use crate::services::signals::IndicatorEngine;
use crate::services::trading_hours::is_trading_hours;
use crate::types::{
    lookup, Action, AdvisoryDecision, AdvisoryOpinion, CandleSeries, IndicatorSnapshot, Instrument, MomentumDirection,
    RiskParams, ScoreResult, SignalDirective,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TA outcome before any advisory input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub action: Action,
    /// TA score including the volume bonus.
    pub score: f64,
    /// Confidence for the side the score leans to.
    pub confidence: f64,
    pub min_buy: f64,
    pub max_sell: f64,
    pub momentum: MomentumDirection,
}

/// Result of arbitrating a candidate against whatever advisory input arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub action: Action,
    pub score: f64,
    pub confidence: f64,
    pub rationale: String,
    /// Set when an advisory opinion overruled the candidate.
    pub vetoed: bool,
}

/// Candidate direction from the score alone.
pub fn candidate_action(score: f64, min_buy: f64, max_sell: f64) -> Action {
    if score >= min_buy {
        Action::Buy
    } else if score <= max_sell {
        Action::Sell
    } else {
        Action::NoSignal
    }
}

/// Combine the TA candidate with advisory opinions.
///
/// A deep opinion arbitrates directly: it vetoes on `NO_TRADE`, low confidence
/// or disagreement, and otherwise confirms with a blended confidence. Without
/// one, the momentum-gated path runs on the TA score, lightly blended with the
/// quick opinion when there is one.
pub fn arbitrate(
    candidate: &Candidate,
    quick: Option<&AdvisoryOpinion>,
    deep: Option<&AdvisoryOpinion>,
    cfg: &Config,
) -> Verdict {
    if let Some(opinion) = deep.filter(|_| candidate.action != Action::NoSignal) {
        return arbitrate_deep(candidate, opinion, cfg);
    }
    momentum_gate(candidate, quick, cfg)
}

fn arbitrate_deep(candidate: &Candidate, opinion: &AdvisoryOpinion, cfg: &Config) -> Verdict {
    let veto = |reason: String| Verdict {
        action: Action::NoSignal,
        score: candidate.score,
        confidence: 0.0,
        rationale: reason,
        vetoed: true,
    };

    if opinion.decision == AdvisoryDecision::NoTrade {
        return veto(format!(
            "Advisory veto: NO_TRADE ({:.0}%) on {} candidate. {}",
            opinion.confidence, candidate.action, opinion.rationale
        ));
    }
    if opinion.confidence < cfg.advisory.min_advisory_confidence {
        return veto(format!(
            "Advisory veto: confidence {:.0}% below {:.0}%",
            opinion.confidence, cfg.advisory.min_advisory_confidence
        ));
    }
    if !opinion.decision.agrees_with(candidate.action) {
        return veto(format!(
            "Advisory veto: {:?} disagrees with {} candidate",
            opinion.decision, candidate.action
        ));
    }

    let (wt, wa) = (cfg.decision.ta_blend_weight.max(0.0), cfg.decision.advisory_blend_weight.max(0.0));
    let blended = if wt + wa > 0.0 {
        (wt * candidate.confidence + wa * opinion.confidence) / (wt + wa)
    } else {
        candidate.confidence
    };

    Verdict {
        action: candidate.action,
        score: candidate.score,
        confidence: (blended.clamp(0.0, 100.0) * 10.0).round() / 10.0,
        rationale: format!(
            "{} confirmed by advisory: pattern {} ({:.0}%). {}",
            candidate.action, opinion.pattern, opinion.confidence, opinion.rationale
        ),
        vetoed: false,
    }
}

fn momentum_gate(candidate: &Candidate, quick: Option<&AdvisoryOpinion>, cfg: &Config) -> Verdict {
    let d = &cfg.decision;
    let final_score = match quick {
        Some(opinion) => {
            let w = cfg.effective_advisory_weight();
            clamp_score(w * opinion.directional_score() + (1.0 - w) * candidate.score)
        }
        None => candidate.score,
    };
    let (min_buy, max_sell) = (candidate.min_buy, candidate.max_sell);
    let reject = |rationale: String| Verdict {
        action: Action::NoSignal,
        score: final_score,
        confidence: 0.0,
        rationale,
        vetoed: false,
    };

    let (action, against) = if final_score >= min_buy {
        (Action::Buy, candidate.momentum == MomentumDirection::Down)
    } else if final_score <= max_sell {
        (Action::Sell, candidate.momentum == MomentumDirection::Up)
    } else {
        return reject(format!(
            "Score {:.1} between thresholds ({} < score < {})",
            final_score, max_sell, min_buy
        ));
    };

    let mut score = final_score;
    let mut conf = candidate.confidence;
    let mut notes = Vec::new();
    if against {
        debug!("{} momentum mismatch ({:?}), applying penalties", action, candidate.momentum);
        score += match action {
            Action::Buy => -d.momentum_penalty_score,
            _ => d.momentum_penalty_score,
        };
        conf -= d.momentum_penalty_confidence;
        notes.push(format!("{} penalty applied due to momentum {:?}", action, candidate.momentum));
    }

    let clears = match action {
        Action::Buy => score >= min_buy,
        _ => score <= max_sell,
    };
    if conf >= d.min_confidence && clears {
        notes.push(format!("{}: passed thresholds", action));
        Verdict {
            action,
            score,
            confidence: conf,
            rationale: notes.join("; "),
            vetoed: false,
        }
    } else {
        notes.push(format!("Rejected {}: adjusted score {:.1} / confidence {:.1}", action, score, conf));
        reject(notes.join("; "))
    }
}

/// Stop-loss and take-profit around `price` for an actionable direction.
pub fn risk_levels(action: Action, price: f64, atr: f64, cfg: &RiskConfig) -> (f64, f64) {
    let sign = if action == Action::Sell { -1.0 } else { 1.0 };
    if atr.is_finite() && atr > 0.0 {
        (
            price - sign * atr * cfg.atr_sl_multiplier,
            price + sign * atr * cfg.atr_tp_multiplier,
        )
    } else {
        (
            price * (1.0 - sign * cfg.stop_loss_pct),
            price * (1.0 + sign * cfg.take_profit_pct),
        )
    }
}

/// Directive lifetime from ATR% buckets, capped and snapped to an allowed value.
pub fn expiration_seconds(atr: f64, price: f64, cfg: &ExpirationConfig) -> u64 {
    let max_secs = cfg.max_minutes.max(1) * 60;
    let cap = |minutes: u64| (minutes * 60).min(max_secs);

    let raw = if atr.is_finite() && atr > 0.0 {
        let pct = volatility_pct(atr, price);
        if pct < cfg.very_low_threshold {
            cap(cfg.low_vol_minutes)
        } else if pct < cfg.low_threshold {
            cap(cfg.medium_vol_minutes)
        } else if pct < cfg.medium_threshold {
            cap(cfg.high_vol_minutes)
        } else if pct < cfg.high_threshold {
            30
        } else if pct < cfg.very_high_threshold {
            10
        } else {
            5
        }
    } else {
        cap(cfg.medium_vol_minutes)
    };

    cfg.allowed_seconds
        .iter()
        .copied()
        .min_by_key(|allowed| allowed.abs_diff(raw))
        .unwrap_or(raw)
        .max(1)
}

pub struct DecisionEngine {
    config: Arc<SharedConfig>,
    metrics: Arc<PipelineMetrics>,
    gateway: Arc<MarketDataGateway>,
    indicators: Arc<IndicatorEngine>,
    advisory: Arc<AdvisoryLayer>,
}

impl DecisionEngine {
    pub fn new(
        config: Arc<SharedConfig>,
        metrics: Arc<PipelineMetrics>,
        gateway: Arc<MarketDataGateway>,
        indicators: Arc<IndicatorEngine>,
        advisory: Arc<AdvisoryLayer>,
    ) -> Self {
        Self {
            config,
            metrics,
            gateway,
            indicators,
            advisory,
        }
    }

    /// Run one cycle for an instrument. Always returns a directive.
    pub async fn decide(&self, raw_symbol: &str) -> SignalDirective {
        let directive = self.run(raw_symbol).await;
        self.record(&directive);
        directive
    }

    /// `decide` bounded by a caller ceiling; timing out yields `NO_SIGNAL`.
    ///
    /// The cycle runs on its own task. Past the ceiling that task is left to
    /// finish on its own, so a late fetch still lands in the candle cache, and
    /// its directive is dropped unrecorded.
    pub async fn decide_within(self: &Arc<Self>, raw_symbol: &str, ceiling: Duration) -> SignalDirective {
        let engine = Arc::clone(self);
        let owned = raw_symbol.to_string();
        let task = tokio::spawn(async move { engine.run(&owned).await });

        let directive = match tokio::time::timeout(ceiling, task).await {
            Ok(Ok(directive)) => directive,
            Ok(Err(e)) => {
                warn!("Decision task for {} failed: {}", raw_symbol, e);
                Self::fallback(raw_symbol, "Decision failed")
            }
            Err(_) => {
                warn!("Decision for {} exceeded {:?}", raw_symbol, ceiling);
                Self::fallback(raw_symbol, "Decision timed out")
            }
        };
        self.record(&directive);
        directive
    }

    async fn run(&self, raw_symbol: &str) -> SignalDirective {
        let cfg = self.config.snapshot();
        match lookup(raw_symbol) {
            Ok(instrument) => self.decide_instrument(instrument, &cfg).await,
            Err(e) => SignalDirective::no_signal(
                raw_symbol.trim().to_ascii_uppercase(),
                0.0,
                e.truncated(cfg.decision.error_message_max_length),
            ),
        }
    }

    fn fallback(raw_symbol: &str, rationale: &str) -> SignalDirective {
        let (symbol, price) = match lookup(raw_symbol) {
            Ok(instrument) => (instrument.symbol.to_string(), instrument.fallback_price),
            Err(_) => (raw_symbol.trim().to_ascii_uppercase(), 0.0),
        };
        SignalDirective::no_signal(symbol, price, rationale)
    }

    fn record(&self, directive: &SignalDirective) {
        self.metrics.record_directive(directive.action);
        info!(
            "Directive {} {} @ {:.5} (score {:.1}, confidence {:.1}): {}",
            directive.symbol, directive.action, directive.price, directive.ta_score, directive.confidence, directive.rationale
        );
    }

    async fn decide_instrument(&self, instrument: &'static Instrument, cfg: &Config) -> SignalDirective {
        let max_len = cfg.decision.error_message_max_length;

        if !is_trading_hours(&cfg.trading_hours, Utc::now()) {
            debug!("Outside trading hours, skipping {}", instrument.symbol);
            return SignalDirective::no_signal(
                instrument.symbol,
                instrument.fallback_price,
                format!(
                    "Outside trading hours ({}:00-{}:00 UTC)",
                    cfg.trading_hours.start_hour, cfg.trading_hours.end_hour
                ),
            );
        }

        // FETCH
        let series = match self.gateway.fetch(instrument.symbol).await {
            Ok(series) => series,
            Err(e) => {
                warn!("No market data for {}: {}", instrument.symbol, e);
                return SignalDirective::no_signal(instrument.symbol, instrument.fallback_price, e.truncated(max_len));
            }
        };

        match self.evaluate(instrument, &series, cfg).await {
            Ok(directive) => directive,
            Err(e) => {
                warn!("Analysis failed for {}: {}", instrument.symbol, e);
                let price = series.last_close().unwrap_or(instrument.fallback_price);
                SignalDirective::no_signal(instrument.symbol, price, format!("Error: {}", e.truncated(max_len)))
            }
        }
    }

    async fn evaluate(
        &self,
        instrument: &'static Instrument,
        series: &CandleSeries,
        cfg: &Config,
    ) -> Result<SignalDirective> {
        let price = series
            .last_close()
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| AppError::Internal(format!("no usable price in {} bars", series.len())))?;

        // INDICATORS
        let snapshot = self.indicators.compute(series, price);
        let scored = ScoringEngine::new(cfg).evaluate(series.candles(), &snapshot);

        // CANDIDATE
        let candidate = self.candidate(series, &snapshot, &scored, price, cfg);
        debug!(
            "{} trend {:?} ({:.0}), momentum {:?} ({:.4}%), score {:.1}, thresholds {}/{}",
            instrument.symbol,
            scored.trend.direction,
            scored.trend.strength,
            scored.momentum.direction,
            scored.momentum.change_pct,
            candidate.score,
            candidate.min_buy,
            candidate.max_sell
        );

        // ADVISORY
        let (quick, deep) = if candidate.action != Action::NoSignal && self.advisory.is_available() {
            let request = AdvisoryRequest {
                symbol: instrument.symbol.to_string(),
                candles: series.tail(cfg.advisory.candles_in_prompt).to_vec(),
                indicators: snapshot,
                price,
                candidate: candidate.action,
                ta_score: candidate.score,
                ta_confidence: candidate.confidence,
                buy_threshold: candidate.min_buy,
                sell_threshold: candidate.max_sell,
            };
            self.await_advisory(request, cfg).await
        } else {
            (None, None)
        };

        let verdict = arbitrate(&candidate, quick.as_ref(), deep.as_ref(), cfg);
        if verdict.vetoed {
            self.metrics.record_advisory_veto();
        }

        // FINALIZE
        let risk_params = (verdict.action != Action::NoSignal).then(|| {
            let (stop_loss, take_profit) = risk_levels(verdict.action, price, snapshot.atr, &cfg.risk);
            RiskParams {
                stop_loss,
                take_profit,
                expiration_seconds: expiration_seconds(snapshot.atr, price, &cfg.risk.expiration),
            }
        });

        Ok(SignalDirective {
            id: uuid::Uuid::new_v4(),
            symbol: instrument.symbol.to_string(),
            action: verdict.action,
            price,
            ta_score: (verdict.score * 10.0).round() / 10.0,
            confidence: verdict.confidence,
            indicators: snapshot,
            risk_params,
            rationale: verdict.rationale,
            trend: Some(scored.trend),
            momentum: Some(scored.momentum),
            advisory: deep.or(quick),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    fn candidate(
        &self,
        series: &CandleSeries,
        snapshot: &IndicatorSnapshot,
        scored: &ScoreResult,
        price: f64,
        cfg: &Config,
    ) -> Candidate {
        let bonus = volume_bonus(series.candles());
        let score = clamp_score(scored.ta_score + bonus);
        if bonus > 0.0 {
            debug!("Volume bonus +{:.0} for {}", bonus, series.symbol);
        }

        let adaptive = adaptive_thresholds(snapshot.atr, price);
        let min_buy = cfg.decision.min_signal_score.max(adaptive.min_buy_score);
        let max_sell = cfg.decision.max_sell_score.min(adaptive.max_sell_score);

        Candidate {
            action: candidate_action(score, min_buy, max_sell),
            score,
            confidence: confidence(snapshot, leaning(score), &cfg.thresholds),
            min_buy,
            max_sell,
            momentum: scored.momentum.direction,
        }
    }

    /// Launch both advisory flavors in the background and wait up to the budget.
    /// A call still running afterwards is left to finish on its own; its result is dropped.
    async fn await_advisory(
        &self,
        request: AdvisoryRequest,
        cfg: &Config,
    ) -> (Option<AdvisoryOpinion>, Option<AdvisoryOpinion>) {
        let layer = Arc::clone(&self.advisory);
        let symbol = request.symbol.clone();
        let handle = tokio::spawn(async move { layer.consult_both(&request).await });

        let budget = Duration::from_secs_f64(cfg.advisory.wait_budget_secs.max(0.1));
        match tokio::time::timeout(budget, handle).await {
            Ok(Ok(opinions)) => opinions,
            Ok(Err(e)) => {
                warn!("Advisory task for {} failed: {}", symbol, e);
                (None, None)
            }
            Err(_) => {
                info!("Advisory still pending for {} after {:?}, using TA only", symbol, budget);
                (None, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdvisorySource;

    fn candidate(action: Action, score: f64, confidence: f64, momentum: MomentumDirection) -> Candidate {
        Candidate {
            action,
            score,
            confidence,
            min_buy: 60.0,
            max_sell: 40.0,
            momentum,
        }
    }

    fn opinion(decision: AdvisoryDecision, confidence: f64, source: AdvisorySource) -> AdvisoryOpinion {
        AdvisoryOpinion {
            decision,
            confidence,
            pattern: "hammer".to_string(),
            rationale: String::new(),
            source,
        }
    }

    // =========================================================================
    // Momentum-gated path
    // =========================================================================

    #[test]
    fn test_buy_accepted_with_aligned_momentum() {
        let cfg = Config::default();
        let v = arbitrate(&candidate(Action::Buy, 68.0, 62.0, MomentumDirection::Up), None, None, &cfg);
        assert_eq!(v.action, Action::Buy);
        assert_eq!(v.score, 68.0);
        assert_eq!(v.confidence, 62.0);
    }

    #[test]
    fn test_momentum_penalty_rejects_buy() {
        let cfg = Config::default();
        let v = arbitrate(&candidate(Action::Buy, 68.0, 62.0, MomentumDirection::Down), None, None, &cfg);
        assert_eq!(v.action, Action::NoSignal);
        assert!(v.rationale.contains("penalty"));
        assert!(v.rationale.contains("Rejected BUY"));
    }

    #[test]
    fn test_momentum_penalty_survivable() {
        let cfg = Config::default();
        let v = arbitrate(&candidate(Action::Sell, 30.0, 73.0, MomentumDirection::Up), None, None, &cfg);
        assert_eq!(v.action, Action::Sell);
        assert_eq!(v.score, 37.0);
        assert_eq!(v.confidence, 68.0);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let cfg = Config::default();
        let v = arbitrate(&candidate(Action::Sell, 33.0, 51.0, MomentumDirection::Down), None, None, &cfg);
        assert_eq!(v.action, Action::NoSignal);
    }

    #[test]
    fn test_middle_score_is_no_signal() {
        let cfg = Config::default();
        let v = arbitrate(&candidate(Action::NoSignal, 50.0, 0.0, MomentumDirection::Neutral), None, None, &cfg);
        assert_eq!(v.action, Action::NoSignal);
        assert!(v.rationale.starts_with("Score 50.0 between thresholds"));
    }

    #[test]
    fn test_quick_opinion_blends_lightly() {
        let cfg = Config::default();
        let quick = opinion(AdvisoryDecision::Sell, 0.0, AdvisorySource::Quick);
        // 0.1 * 30 + 0.9 * 64 = 60.6, still a BUY
        let v = arbitrate(&candidate(Action::Buy, 64.0, 62.0, MomentumDirection::Up), Some(&quick), None, &cfg);
        assert_eq!(v.action, Action::Buy);
        assert!((v.score - 60.6).abs() < 1e-9);
        // 0.1 * 30 + 0.9 * 62 = 58.8, below the buy threshold
        let v = arbitrate(&candidate(Action::Buy, 62.0, 62.0, MomentumDirection::Up), Some(&quick), None, &cfg);
        assert_eq!(v.action, Action::NoSignal);
    }

    // =========================================================================
    // Deep arbitration
    // =========================================================================

    #[test]
    fn test_no_trade_vetoes() {
        let cfg = Config::default();
        let deep = opinion(AdvisoryDecision::NoTrade, 80.0, AdvisorySource::Deep);
        let v = arbitrate(&candidate(Action::Buy, 68.0, 62.0, MomentumDirection::Up), None, Some(&deep), &cfg);
        assert_eq!(v.action, Action::NoSignal);
        assert!(v.vetoed);
        assert!(v.rationale.contains("NO_TRADE"));
    }

    #[test]
    fn test_disagreement_and_low_confidence_veto() {
        let cfg = Config::default();
        let c = candidate(Action::Buy, 68.0, 62.0, MomentumDirection::Up);
        let sell = opinion(AdvisoryDecision::Sell, 90.0, AdvisorySource::Deep);
        assert!(arbitrate(&c, None, Some(&sell), &cfg).vetoed);
        let weak = opinion(AdvisoryDecision::Buy, 40.0, AdvisorySource::Deep);
        assert!(arbitrate(&c, None, Some(&weak), &cfg).vetoed);
    }

    #[test]
    fn test_agreement_blends_confidence() {
        let cfg = Config::default();
        let deep = opinion(AdvisoryDecision::Buy, 80.0, AdvisorySource::Deep);
        // Deep confirmation skips the momentum penalty.
        let v = arbitrate(&candidate(Action::Buy, 68.0, 62.0, MomentumDirection::Down), None, Some(&deep), &cfg);
        assert_eq!(v.action, Action::Buy);
        assert!(!v.vetoed);
        // 0.7 * 62 + 0.3 * 80 = 67.4
        assert_eq!(v.confidence, 67.4);
    }

    #[test]
    fn test_blend_weights_renormalized() {
        let mut cfg = Config::default();
        cfg.decision.ta_blend_weight = 1.0;
        cfg.decision.advisory_blend_weight = 1.0;
        let deep = opinion(AdvisoryDecision::Sell, 80.0, AdvisorySource::Deep);
        let v = arbitrate(&candidate(Action::Sell, 30.0, 62.0, MomentumDirection::Down), None, Some(&deep), &cfg);
        assert_eq!(v.confidence, 71.0);
    }

    // =========================================================================
    // Finalize
    // =========================================================================

    #[test]
    fn test_risk_levels() {
        let cfg = RiskConfig::default();
        let (sl, tp) = risk_levels(Action::Buy, 1.1, 0.001, &cfg);
        assert!((sl - 1.098).abs() < 1e-12);
        assert!((tp - 1.1025).abs() < 1e-12);

        let (sl, tp) = risk_levels(Action::Sell, 1.1, 0.001, &cfg);
        assert!((sl - 1.102).abs() < 1e-12);
        assert!((tp - 1.0975).abs() < 1e-12);

        let (sl, tp) = risk_levels(Action::Buy, 100.0, 0.0, &cfg);
        assert!((sl - 99.8).abs() < 1e-9);
        assert!((tp - 100.2).abs() < 1e-9);
    }

    #[test]
    fn test_expiration_buckets() {
        let cfg = ExpirationConfig::default();
        assert_eq!(expiration_seconds(0.0003, 1.0, &cfg), 180);
        assert_eq!(expiration_seconds(0.0008, 1.0, &cfg), 120);
        assert_eq!(expiration_seconds(0.0015, 1.0, &cfg), 60);
        assert_eq!(expiration_seconds(0.003, 1.0, &cfg), 30);
        assert_eq!(expiration_seconds(0.006, 1.0, &cfg), 10);
        assert_eq!(expiration_seconds(0.02, 1.0, &cfg), 5);
        // Unknown ATR uses the medium bucket.
        assert_eq!(expiration_seconds(0.0, 1.0, &cfg), 120);
    }

    #[test]
    fn test_expiration_snaps_to_allowed() {
        let cfg = ExpirationConfig {
            max_minutes: 1,
            allowed_seconds: vec![15, 45, 90],
            ..ExpirationConfig::default()
        };
        // 3 minutes capped to 60s, nearest allowed is 45
        assert_eq!(expiration_seconds(0.0003, 1.0, &cfg), 45);
    }

    #[test]
    fn test_candidate_action() {
        assert_eq!(candidate_action(60.0, 60.0, 40.0), Action::Buy);
        assert_eq!(candidate_action(40.0, 60.0, 40.0), Action::Sell);
        assert_eq!(candidate_action(55.0, 60.0, 40.0), Action::NoSignal);
    }
}
