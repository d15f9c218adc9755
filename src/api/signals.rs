//! On-demand directive endpoint.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::types::{lookup, SignalDirective};
use crate::AppState;

/// Header identifying the caller for command throttling.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Create the signals router.
pub fn router() -> Router<AppState> {
    Router::new().route("/:symbol", get(get_directive))
}

fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Run one decision cycle for a symbol.
async fn get_directive(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SignalDirective>> {
    let instrument = lookup(&symbol)?;

    let caller = caller_id(&headers);
    if !state.rate_limiter.allow_command(&caller) {
        return Err(AppError::RateLimited(format!("too many requests from {}", caller)));
    }

    debug!("On-demand directive for {} requested by {}", instrument.symbol, caller);
    let ceiling = Duration::from_secs_f64(state.config.snapshot().decision.decision_timeout_secs.max(0.1));
    let directive = state.engine.decide_within(instrument.symbol, ceiling).await;
    Ok(Json(directive))
}
