//! Runtime configuration endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::AppState;

/// Body of `PUT /api/config`.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: f64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_config).put(update_config))
}

async fn get_config(State(state): State<AppState>) -> Json<Arc<Config>> {
    Json(state.config.snapshot())
}

async fn update_config(State(state): State<AppState>, Json(update): Json<ConfigUpdate>) -> Result<Json<Arc<Config>>> {
    state.config.update(&update.key, update.value)?;
    info!("Config updated: {} = {}", update.key, update.value);
    Ok(Json(state.config.snapshot()))
}
