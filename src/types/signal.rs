//! Indicator, scoring and directive types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Technical indicator values derived from one candle series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    /// MACD line minus signal line.
    pub macd_diff: f64,
    /// Bollinger %B scaled to 0..100.
    pub bb_position: f64,
    pub atr: f64,
    pub adx: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
}

impl IndicatorSnapshot {
    /// Values substituted when an indicator cannot be computed.
    pub fn neutral(price: f64) -> Self {
        Self {
            rsi: 50.0,
            macd_diff: 0.0,
            bb_position: 50.0,
            atr: price * 0.001,
            adx: 20.0,
            stoch_k: 50.0,
            stoch_d: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Ranging,
}

/// Trend classification. `strength` is directional: strong downtrends sit near 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendInfo {
    pub direction: TrendDirection,
    pub strength: f64,
}

impl TrendInfo {
    pub fn ranging() -> Self {
        Self {
            direction: TrendDirection::Ranging,
            strength: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumDirection {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumInfo {
    pub direction: MomentumDirection,
    /// Percent change over the lookback.
    pub change_pct: f64,
    pub strength: f64,
}

impl MomentumInfo {
    pub fn neutral() -> Self {
        Self {
            direction: MomentumDirection::Neutral,
            change_pct: 0.0,
            strength: 0.0,
        }
    }
}

/// Final or candidate trade action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    NoSignal,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::NoSignal => "NO_SIGNAL",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub ta_score: f64,
    pub confidence: f64,
    pub trend: TrendInfo,
    pub momentum: MomentumInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvisoryDecision {
    Buy,
    Sell,
    NoTrade,
}

impl AdvisoryDecision {
    /// Case-insensitive parse of `BUY`, `SELL` or `NO_TRADE` (also `NO TRADE`, `NO-TRADE`).
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match upper.as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "NO_TRADE" => Some(Self::NoTrade),
            _ => None,
        }
    }

    /// Whether this opinion points the same way as a candidate action.
    pub fn agrees_with(&self, action: Action) -> bool {
        matches!(
            (self, action),
            (AdvisoryDecision::Buy, Action::Buy) | (AdvisoryDecision::Sell, Action::Sell)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorySource {
    Quick,
    Deep,
}

/// Opinion returned by the external reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryOpinion {
    pub decision: AdvisoryDecision,
    pub confidence: f64,
    pub pattern: String,
    pub rationale: String,
    pub source: AdvisorySource,
}

impl AdvisoryOpinion {
    /// Coarse directional score used when blending with the TA score.
    pub fn directional_score(&self) -> f64 {
        match self.decision {
            AdvisoryDecision::Buy => 70.0,
            AdvisoryDecision::Sell => 30.0,
            AdvisoryDecision::NoTrade => 50.0,
        }
    }
}

/// Stop-loss, take-profit and expiry attached to every actionable directive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskParams {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub expiration_seconds: u64,
}

/// The pipeline's final decision record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDirective {
    pub id: uuid::Uuid,
    pub symbol: String,
    pub action: Action,
    pub price: f64,
    pub ta_score: f64,
    pub confidence: f64,
    pub indicators: IndicatorSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_params: Option<RiskParams>,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentum: Option<MomentumInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<AdvisoryOpinion>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl SignalDirective {
    /// A directive that recommends nothing, carrying the reason.
    pub fn no_signal(symbol: impl Into<String>, price: f64, rationale: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            symbol: symbol.into(),
            action: Action::NoSignal,
            price,
            ta_score: 50.0,
            confidence: 0.0,
            indicators: IndicatorSnapshot::neutral(price),
            risk_params: None,
            rationale: rationale.into(),
            trend: None,
            momentum: None,
            advisory: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != Action::NoSignal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_decision_parse() {
        assert_eq!(AdvisoryDecision::parse("buy"), Some(AdvisoryDecision::Buy));
        assert_eq!(AdvisoryDecision::parse(" Sell "), Some(AdvisoryDecision::Sell));
        assert_eq!(AdvisoryDecision::parse("no trade"), Some(AdvisoryDecision::NoTrade));
        assert_eq!(AdvisoryDecision::parse("NO-TRADE"), Some(AdvisoryDecision::NoTrade));
        assert_eq!(AdvisoryDecision::parse("HOLD"), None);
    }

    #[test]
    fn test_advisory_agreement() {
        assert!(AdvisoryDecision::Buy.agrees_with(Action::Buy));
        assert!(!AdvisoryDecision::Buy.agrees_with(Action::Sell));
        assert!(!AdvisoryDecision::NoTrade.agrees_with(Action::Buy));
    }

    #[test]
    fn test_directional_score() {
        let mut opinion = AdvisoryOpinion {
            decision: AdvisoryDecision::Buy,
            confidence: 0.0,
            pattern: "none".into(),
            rationale: String::new(),
            source: AdvisorySource::Quick,
        };
        assert_eq!(opinion.directional_score(), 70.0);
        opinion.decision = AdvisoryDecision::Sell;
        assert_eq!(opinion.directional_score(), 30.0);
        opinion.decision = AdvisoryDecision::NoTrade;
        assert_eq!(opinion.directional_score(), 50.0);
    }

    #[test]
    fn test_directive_serialization() {
        let directive = SignalDirective::no_signal("EURUSD", 1.08, "Outside trading hours");
        let json = serde_json::to_value(&directive).unwrap();
        assert_eq!(json["action"], "NO_SIGNAL");
        assert_eq!(json["taScore"], 50.0);
        assert!(json.get("riskParams").is_none());
        assert_eq!(json["indicators"]["bbPosition"], 50.0);
        assert!(!directive.is_actionable());
    }
}
