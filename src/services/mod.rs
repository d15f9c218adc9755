pub mod advisory;
pub mod cache;
pub mod decision;
pub mod market_data;
pub mod metrics;
pub mod rate_limit;
pub mod scoring;
pub mod signals;
pub mod trading_hours;

pub use advisory::{AdvisoryBackend, AdvisoryLayer};
pub use cache::{LruCache, TtlCache};
pub use decision::DecisionEngine;
pub use market_data::{configured_providers, FetchMode, MarketDataGateway};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use rate_limit::RateLimiter;
pub use scoring::ScoringEngine;
pub use signals::IndicatorEngine;
