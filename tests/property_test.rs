//! Property tests for scoring and decision invariants.
//!
//! 1. Scores stay in [0, 100]; confidence is 0 or within [40, 95]
//! 2. Cache TTL never grows with volatility
//! 3. Instrument normalization is idempotent
//! 4. Expirations come from the allowed set; risk levels bracket the price
//! 5. Accepted directives clear their thresholds

use omen::config::{Config, ExpirationConfig, GatewayConfig, RiskConfig, ThresholdConfig};
use omen::error::truncate_message;
use omen::services::decision::{arbitrate, expiration_seconds, risk_levels, Candidate};
use omen::services::scoring::{adaptive_cache_ttl, confidence, detect_trend, ta_score};
use omen::types::{normalize, Action, IndicatorSnapshot, MomentumDirection, INSTRUMENTS};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_snapshot() -> impl Strategy<Value = IndicatorSnapshot> {
    (
        0.0..100.0_f64,
        -0.002..0.002_f64,
        -20.0..120.0_f64,
        0.00001..0.01_f64,
        0.0..100.0_f64,
        0.0..100.0_f64,
        0.0..100.0_f64,
    )
        .prop_map(|(rsi, macd_diff, bb_position, atr, adx, stoch_k, stoch_d)| IndicatorSnapshot {
            rsi,
            macd_diff,
            bb_position,
            atr,
            adx,
            stoch_k,
            stoch_d,
        })
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::Buy), Just(Action::Sell), Just(Action::NoSignal)]
}

fn arb_momentum() -> impl Strategy<Value = MomentumDirection> {
    prop_oneof![
        Just(MomentumDirection::Up),
        Just(MomentumDirection::Down),
        Just(MomentumDirection::Neutral)
    ]
}

// ── 1. Score and confidence bounds ───────────────────────────────────

proptest! {
    #[test]
    fn ta_score_in_range(ind in arb_snapshot(), change in -2.0..2.0_f64) {
        let th = ThresholdConfig::default();
        let trend = detect_trend(&ind, change, &th);
        let score = ta_score(&ind, change, &trend, &th);
        prop_assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn confidence_in_range(ind in arb_snapshot(), action in arb_action()) {
        let c = confidence(&ind, action, &ThresholdConfig::default());
        if action == Action::NoSignal {
            prop_assert_eq!(c, 0.0);
        } else {
            prop_assert!((40.0..=95.0).contains(&c));
        }
    }
}

// ── 2. TTL monotonicity ──────────────────────────────────────────────

proptest! {
    #[test]
    fn cache_ttl_non_increasing_in_atr(price in 0.5..3000.0_f64, a in 0.0..0.01_f64, b in 0.0..0.01_f64) {
        let cfg = GatewayConfig::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let ttl_low = adaptive_cache_ttl(price * low, price, &cfg);
        let ttl_high = adaptive_cache_ttl(price * high, price, &cfg);
        prop_assert!(ttl_high <= ttl_low);
        prop_assert!(ttl_low.as_secs() <= cfg.cache_max_ttl_secs);
        prop_assert!(ttl_high.as_secs() >= cfg.cache_min_ttl_secs);
    }
}

// ── 3. Normalization ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn normalize_idempotent(idx in 0..INSTRUMENTS.len(), sep in prop_oneof![Just(""), Just("/"), Just("-"), Just(" ")], lower in any::<bool>()) {
        let inst = &INSTRUMENTS[idx];
        let mut raw = format!("{}{}{}", inst.base, sep, inst.quote);
        if lower {
            raw = raw.to_lowercase();
        }
        let once = normalize(&raw).unwrap();
        prop_assert_eq!(once, inst.symbol);
        prop_assert_eq!(normalize(once).unwrap(), once);
    }

    #[test]
    fn truncation_bounded(message in ".{0,300}", max in 0usize..200) {
        let cut = truncate_message(&message, max);
        prop_assert!(cut.chars().count() <= max);
        prop_assert!(message.starts_with(&cut));
    }
}

// ── 4. Finalize ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn expiration_always_allowed(atr in 0.0..50.0_f64, price in 0.5..3000.0_f64) {
        let cfg = ExpirationConfig::default();
        let secs = expiration_seconds(atr, price, &cfg);
        prop_assert!(cfg.allowed_seconds.contains(&secs));
        prop_assert!(secs <= cfg.max_minutes * 60);
    }

    #[test]
    fn risk_levels_bracket_price(atr in 0.0..5.0_f64, price in 0.5..3000.0_f64) {
        let cfg = RiskConfig::default();
        let (sl, tp) = risk_levels(Action::Buy, price, atr, &cfg);
        prop_assert!(sl < price && price < tp);
        let (sl, tp) = risk_levels(Action::Sell, price, atr, &cfg);
        prop_assert!(tp < price && price < sl);
    }
}

// ── 5. Acceptance ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn accepted_directives_clear_thresholds(
        score in 0.0..100.0_f64,
        conf in 40.0..95.0_f64,
        momentum in arb_momentum(),
    ) {
        let cfg = Config::default();
        let candidate = Candidate {
            action: omen::services::decision::candidate_action(score, 60.0, 40.0),
            score,
            confidence: conf,
            min_buy: 60.0,
            max_sell: 40.0,
            momentum,
        };
        let verdict = arbitrate(&candidate, None, None, &cfg);
        match verdict.action {
            Action::Buy => prop_assert!(verdict.score >= 60.0 && verdict.confidence >= 60.0),
            Action::Sell => prop_assert!(verdict.score <= 40.0 && verdict.confidence >= 60.0),
            Action::NoSignal => prop_assert_eq!(verdict.confidence, 0.0),
        }
    }
}
