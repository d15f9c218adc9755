pub mod config;
pub mod health;
pub mod signals;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/signals", signals::router())
        .nest("/api/config", config::router())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::{Config, SharedConfig};
    use crate::services::{AdvisoryLayer, FetchMode, MarketDataGateway, PipelineMetrics};
    use crate::sources::{CandleProvider, FetchFuture, ProviderError};
    use crate::types::Instrument;
    use crate::AppState;
    use std::sync::Arc;

    /// Provider that is never reachable.
    pub struct OfflineProvider;

    impl CandleProvider for OfflineProvider {
        fn name(&self) -> &str {
            "offline"
        }

        fn fetch<'a>(&'a self, instrument: &'static Instrument, _bars: usize) -> FetchFuture<'a> {
            Box::pin(async move { Err(ProviderError::NotConfigured(instrument.symbol.to_string())) })
        }
    }

    pub fn state_with(config: Config) -> AppState {
        let shared = SharedConfig::new(config);
        let metrics = PipelineMetrics::new();
        let providers = vec![Arc::new(OfflineProvider) as Arc<dyn CandleProvider>];
        let gateway = MarketDataGateway::new(providers, FetchMode::Sequential, Arc::clone(&shared), Arc::clone(&metrics))
            .expect("gateway");
        let advisory = AdvisoryLayer::new(None, Arc::clone(&shared), Arc::clone(&metrics));
        AppState::new(shared, metrics, gateway, advisory)
    }

    pub fn state() -> AppState {
        state_with(Config::default())
    }
}
