//! Reply parsing for both advisory flavors.

use crate::error::{AppError, Result};
use crate::types::{AdvisoryDecision, AdvisoryOpinion, AdvisorySource};
use serde::Deserialize;
use serde_json::Value;

/// Shape the deep check is asked to reply with. Every field is optional on
/// the wire; `decision` is checked afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeepReply {
    decision: Option<String>,
    pattern: Option<String>,
    confidence: Option<Value>,
    comment: Option<String>,
}

/// The outermost `{ ... }` span of a reply, dropping any text around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// One-word reply: anything mentioning BUY or SELL counts, the rest is no trade.
pub fn parse_quick(reply: &str) -> Result<AdvisoryOpinion> {
    let upper = reply.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(AppError::AdvisoryMalformed("empty reply".to_string()));
    }

    let decision = if upper.contains("BUY") {
        AdvisoryDecision::Buy
    } else if upper.contains("SELL") {
        AdvisoryDecision::Sell
    } else {
        AdvisoryDecision::NoTrade
    };

    Ok(AdvisoryOpinion {
        decision,
        confidence: 0.0,
        pattern: "none".to_string(),
        rationale: upper,
        source: AdvisorySource::Quick,
    })
}

fn confidence_value(raw: Option<&Value>) -> f64 {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0).clamp(0.0, 100.0)
}

/// Structured reply: `{decision, pattern, confidence, comment}`, possibly
/// wrapped in prose or a code fence.
pub fn parse_deep(reply: &str) -> Result<AdvisoryOpinion> {
    let body = extract_json_object(reply)
        .ok_or_else(|| AppError::AdvisoryMalformed("no JSON object in reply".to_string()))?;
    let parsed: DeepReply = serde_json::from_str(body).map_err(|e| AppError::AdvisoryMalformed(e.to_string()))?;

    let raw_decision = parsed
        .decision
        .ok_or_else(|| AppError::AdvisoryMalformed("missing decision".to_string()))?;
    let decision = AdvisoryDecision::parse(&raw_decision)
        .ok_or_else(|| AppError::AdvisoryMalformed(format!("invalid decision '{}'", raw_decision)))?;

    let pattern = parsed
        .pattern
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "none".to_string());

    Ok(AdvisoryOpinion {
        decision,
        confidence: confidence_value(parsed.confidence.as_ref()),
        pattern,
        rationale: parsed.comment.unwrap_or_default().trim().to_string(),
        source: AdvisorySource::Deep,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_reply_mapping() {
        assert_eq!(parse_quick("buy").unwrap().decision, AdvisoryDecision::Buy);
        assert_eq!(parse_quick(" SELL.\n").unwrap().decision, AdvisoryDecision::Sell);
        let none = parse_quick("NO_SIGNAL").unwrap();
        assert_eq!(none.decision, AdvisoryDecision::NoTrade);
        assert_eq!(none.directional_score(), 50.0);
        assert_eq!(none.source, AdvisorySource::Quick);
        assert!(parse_quick("   ").is_err());
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("sure: {\"a\": {\"b\": 1}} done"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_deep_reply_with_surrounding_text() {
        let reply = "Here you go:\n```json\n{\"decision\": \"no trade\", \"pattern\": \"doji\", \
                     \"confidence\": 80, \"comment\": \"Indecision at resistance\"}\n```";
        let opinion = parse_deep(reply).unwrap();
        assert_eq!(opinion.decision, AdvisoryDecision::NoTrade);
        assert_eq!(opinion.pattern, "doji");
        assert_eq!(opinion.confidence, 80.0);
        assert_eq!(opinion.rationale, "Indecision at resistance");
        assert_eq!(opinion.source, AdvisorySource::Deep);
    }

    #[test]
    fn test_deep_defaults_optional_fields() {
        let opinion = parse_deep("{\"decision\": \"BUY\"}").unwrap();
        assert_eq!(opinion.pattern, "none");
        assert_eq!(opinion.confidence, 0.0);
        assert_eq!(opinion.rationale, "");
    }

    #[test]
    fn test_deep_clamps_confidence() {
        let opinion = parse_deep("{\"decision\": \"sell\", \"confidence\": \"250\", \"pattern\": \"  \"}").unwrap();
        assert_eq!(opinion.decision, AdvisoryDecision::Sell);
        assert_eq!(opinion.confidence, 100.0);
        assert_eq!(opinion.pattern, "none");
    }

    #[test]
    fn test_deep_rejects_bad_decisions() {
        assert!(matches!(parse_deep("{\"pattern\": \"hammer\"}"), Err(AppError::AdvisoryMalformed(_))));
        assert!(matches!(parse_deep("{\"decision\": \"HOLD\"}"), Err(AppError::AdvisoryMalformed(_))));
        assert!(matches!(parse_deep("BUY"), Err(AppError::AdvisoryMalformed(_))));
        assert!(matches!(parse_deep("{not json}"), Err(AppError::AdvisoryMalformed(_))));
    }
}
