use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported instrument: {0}")]
    UnsupportedInstrument(String),

    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Advisory timed out after {0:.1}s")]
    AdvisoryTimeout(f64),

    #[error("Advisory response malformed: {0}")]
    AdvisoryMalformed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Render the error for embedding in a directive rationale, cut to `max_len` characters.
    pub fn truncated(&self, max_len: usize) -> String {
        truncate_message(&self.to_string(), max_len)
    }
}

/// Cut a message to at most `max_len` characters without splitting a code point.
pub fn truncate_message(message: &str, max_len: usize) -> String {
    message.chars().take(max_len).collect()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::UnsupportedInstrument(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::DataUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::AdvisoryTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::AdvisoryMalformed(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Configuration(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Reqwest(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::SerdeJson(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Anyhow(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
