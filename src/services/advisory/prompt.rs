use super::{AdvisoryRequest, CompletionRequest};
use crate::config::AdvisoryConfig;
use crate::types::AdvisorySource;
use chrono::{TimeZone, Utc};
use serde_json::json;

const QUICK_SYSTEM: &str = "You give trading signals only. Reply with one word: BUY, SELL or NO_SIGNAL.";

const DEEP_SYSTEM: &str = "You are a Japanese candlestick specialist. The input is JSON with symbol, \
timeframe, last_candles, indicators, candidate_signal, ta_score and ta_confidence. Identify clear \
candlestick patterns (hammer, shooting star, engulfing, star and similar) and judge whether they \
support candidate_signal. Reply strictly with JSON and no surrounding text: \
{\"decision\":\"BUY|SELL|NO_TRADE\",\"pattern\":\"pattern name or none\",\"confidence\":0-100,\
\"comment\":\"short explanation\"}. Use BUY or SELL for the direction the candles support and \
NO_TRADE when there is no clear pattern or the trade is better skipped.";

fn rsi_label(rsi: f64) -> &'static str {
    if rsi < 30.0 {
        "oversold"
    } else if rsi > 70.0 {
        "overbought"
    } else {
        "neutral"
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// One-word direction check from headline indicators.
pub fn quick_request(req: &AdvisoryRequest, cfg: &AdvisoryConfig) -> CompletionRequest {
    let ind = &req.indicators;
    let user = format!(
        "Give a clear trading signal for {} based on these indicators:\n\
         RSI: {:.1} ({})\n\
         MACD: {:.5} ({})\n\
         Price: {:.5}\n\n\
         Answer with ONE word only: BUY, SELL or NO_SIGNAL",
        req.symbol,
        ind.rsi,
        rsi_label(ind.rsi),
        ind.macd_diff,
        if ind.macd_diff > 0.0 { "positive" } else { "negative" },
        req.price,
    );

    CompletionRequest {
        source: AdvisorySource::Quick,
        model: cfg.model.clone(),
        system: QUICK_SYSTEM.to_string(),
        user,
        max_tokens: 10,
        temperature: 0.1,
        json_mode: false,
    }
}

/// Candlestick pattern review of the recent bars against the TA candidate.
pub fn deep_request(req: &AdvisoryRequest, cfg: &AdvisoryConfig) -> CompletionRequest {
    let start = req.candles.len().saturating_sub(cfg.candles_in_prompt);
    let candles: Vec<_> = req.candles[start..]
        .iter()
        .map(|c| {
            let time = Utc
                .timestamp_millis_opt(c.time)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            json!({ "time": time, "open": c.open, "high": c.high, "low": c.low, "close": c.close })
        })
        .collect();

    let ind = &req.indicators;
    let payload = json!({
        "symbol": req.symbol,
        "timeframe": "1min",
        "last_candles": candles,
        "indicators": {
            "rsi": ind.rsi,
            "macd": ind.macd_diff,
            "bb_position": ind.bb_position,
            "adx": ind.adx,
            "stoch_k": ind.stoch_k,
            "stoch_d": ind.stoch_d,
        },
        "candidate_signal": req.candidate.as_str(),
        "ta_score": round1(req.ta_score),
        "ta_confidence": round1(req.ta_confidence),
    });

    let user = format!(
        "Analyse this market data and identify candlestick patterns:\n\n{}\n\n\
         Do they confirm candidate_signal ({})? Reply strictly in JSON with no text around it.",
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string()),
        req.candidate,
    );

    CompletionRequest {
        source: AdvisorySource::Deep,
        model: cfg.model.clone(),
        system: DEEP_SYSTEM.to_string(),
        user,
        max_tokens: 200,
        temperature: 0.1,
        json_mode: true,
    }
}
