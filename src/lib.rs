//! Omen - short-horizon forex signal pipeline

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use config::SharedConfig;
use services::{AdvisoryLayer, DecisionEngine, IndicatorEngine, MarketDataGateway, PipelineMetrics, RateLimiter};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers and the analysis loop.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SharedConfig>,
    pub metrics: Arc<PipelineMetrics>,
    pub gateway: Arc<MarketDataGateway>,
    pub engine: Arc<DecisionEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the pipeline components around a gateway and advisory layer.
    pub fn new(
        config: Arc<SharedConfig>,
        metrics: Arc<PipelineMetrics>,
        gateway: MarketDataGateway,
        advisory: Arc<AdvisoryLayer>,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let indicators = Arc::new(IndicatorEngine::new(Arc::clone(&config), Arc::clone(&metrics)));
        let engine = Arc::new(DecisionEngine::new(
            Arc::clone(&config),
            Arc::clone(&metrics),
            Arc::clone(&gateway),
            indicators,
            advisory,
        ));
        let rate_limiter = RateLimiter::new(Arc::clone(&config));

        Self {
            config,
            metrics,
            gateway,
            engine,
            rate_limiter,
            started_at: Instant::now(),
        }
    }
}
