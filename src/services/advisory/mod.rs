//! Advisory layer.
//!
//! Optional second opinion from an external reasoning service, in two flavors:
//! a quick one-word direction check and a deeper candlestick pattern review.
//! Each flavor is gated on the TA candidate, rate limited, cooled down per
//! instrument and bounded by a timeout. Any failure yields `None` so the
//! caller falls back to TA alone. Opinions are never cached.

pub mod openai;
pub mod parse;
pub mod prompt;

pub use openai::OpenAiBackend;

use crate::config::{AdvisoryConfig, Config, SharedConfig};
use crate::error::{AppError, Result};
use crate::services::metrics::PipelineMetrics;
use crate::services::rate_limit::SlidingWindowCounter;
use crate::types::{Action, AdvisoryOpinion, AdvisorySource, Candle, IndicatorSnapshot};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// One chat-completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub source: AdvisorySource,
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Ask the service for a JSON object reply.
    pub json_mode: bool,
}

pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Transport to the reasoning service. Returns the raw reply text.
pub trait AdvisoryBackend: Send + Sync {
    fn name(&self) -> &str;

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;
}

/// Everything the advisory layer sees about one TA candidate.
#[derive(Debug, Clone)]
pub struct AdvisoryRequest {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorSnapshot,
    pub price: f64,
    pub candidate: Action,
    pub ta_score: f64,
    pub ta_confidence: f64,
    /// Adaptive buy threshold the candidate was measured against.
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

/// Whether a candidate is clear enough to be worth an external call.
pub fn passes_gate(req: &AdvisoryRequest, cfg: &AdvisoryConfig) -> bool {
    let clears = match req.candidate {
        Action::Buy => req.ta_score >= req.buy_threshold + cfg.min_gap,
        Action::Sell => req.ta_score <= req.sell_threshold - cfg.min_gap,
        Action::NoSignal => false,
    };
    clears && req.ta_confidence >= cfg.min_ta_confidence
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardRejection {
    #[error("hourly call limit reached")]
    HourlyLimit,
    #[error("per-minute call limit reached")]
    MinuteLimit,
    #[error("cooldown active, {0:?} remaining")]
    Cooldown(Duration),
}

/// Rolling call limits plus a per-instrument cooldown for one flavor.
pub struct AdvisoryGuard {
    calls: Mutex<SlidingWindowCounter>,
    cooldowns: DashMap<String, Instant>,
}

impl Default for AdvisoryGuard {
    fn default() -> Self {
        Self {
            calls: Mutex::new(SlidingWindowCounter::new(0, HOUR)),
            cooldowns: DashMap::new(),
        }
    }
}

impl AdvisoryGuard {
    /// Check every guard and, if all pass, record the call and start the cooldown.
    pub fn try_acquire(
        &self,
        symbol: &str,
        now: Instant,
        cfg: &AdvisoryConfig,
    ) -> std::result::Result<(), GuardRejection> {
        let mut calls = match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        calls.set_limit(cfg.calls_per_hour);
        if !calls.has_capacity(now) {
            return Err(GuardRejection::HourlyLimit);
        }
        if calls.count_within(now, MINUTE) >= cfg.calls_per_minute {
            return Err(GuardRejection::MinuteLimit);
        }

        let cooldown = Duration::from_secs(cfg.cooldown_secs);
        match self.cooldowns.entry(symbol.to_string()) {
            Entry::Occupied(mut last) => {
                let elapsed = now.saturating_duration_since(*last.get());
                if elapsed < cooldown {
                    return Err(GuardRejection::Cooldown(cooldown - elapsed));
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        calls.record(now);
        Ok(())
    }
}

pub struct AdvisoryLayer {
    backend: Option<Arc<dyn AdvisoryBackend>>,
    config: Arc<SharedConfig>,
    metrics: Arc<PipelineMetrics>,
    quick_guard: AdvisoryGuard,
    deep_guard: AdvisoryGuard,
}

impl AdvisoryLayer {
    pub fn new(
        backend: Option<Arc<dyn AdvisoryBackend>>,
        config: Arc<SharedConfig>,
        metrics: Arc<PipelineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            config,
            metrics,
            quick_guard: AdvisoryGuard::default(),
            deep_guard: AdvisoryGuard::default(),
        })
    }

    /// Layer backed by the OpenAI-compatible endpoint, or disabled without an API key.
    pub fn from_config(
        config: &Config,
        shared: Arc<SharedConfig>,
        metrics: Arc<PipelineMetrics>,
    ) -> Arc<Self> {
        let backend = config.openai_api_key.as_ref().map(|key| {
            Arc::new(OpenAiBackend::new(key.clone(), config.openai_base_url.clone())) as Arc<dyn AdvisoryBackend>
        });
        if backend.is_none() {
            info!("No OPENAI_API_KEY set, advisory layer disabled");
        }
        Self::new(backend, shared, metrics)
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some() && self.config.snapshot().advisory.enabled
    }

    /// Deep pattern review of a candidate.
    pub async fn consult(&self, req: &AdvisoryRequest) -> Option<AdvisoryOpinion> {
        self.consult_deep(req).await
    }

    pub async fn consult_quick(&self, req: &AdvisoryRequest) -> Option<AdvisoryOpinion> {
        self.consult_flavor(AdvisorySource::Quick, req).await
    }

    pub async fn consult_deep(&self, req: &AdvisoryRequest) -> Option<AdvisoryOpinion> {
        self.consult_flavor(AdvisorySource::Deep, req).await
    }

    /// Both flavors concurrently, as `(quick, deep)`.
    pub async fn consult_both(&self, req: &AdvisoryRequest) -> (Option<AdvisoryOpinion>, Option<AdvisoryOpinion>) {
        tokio::join!(self.consult_quick(req), self.consult_deep(req))
    }

    async fn consult_flavor(&self, source: AdvisorySource, req: &AdvisoryRequest) -> Option<AdvisoryOpinion> {
        let backend = self.backend.as_ref()?;
        let cfg = self.config.snapshot();
        let advisory = &cfg.advisory;

        let flavor_enabled = match source {
            AdvisorySource::Quick => advisory.quick_enabled,
            AdvisorySource::Deep => advisory.deep_enabled,
        };
        if !advisory.enabled || !flavor_enabled {
            debug!("Advisory {:?} disabled", source);
            return None;
        }
        if !passes_gate(req, advisory) {
            debug!(
                "Advisory {:?} skipped for {}: {} score {:.1} conf {:.1} not clear enough",
                source, req.symbol, req.candidate, req.ta_score, req.ta_confidence
            );
            return None;
        }

        let guard = match source {
            AdvisorySource::Quick => &self.quick_guard,
            AdvisorySource::Deep => &self.deep_guard,
        };
        if let Err(rejection) = guard.try_acquire(&req.symbol, Instant::now(), advisory) {
            debug!("Advisory {:?} skipped for {}: {}", source, req.symbol, rejection);
            return None;
        }

        let (request, timeout_secs) = match source {
            AdvisorySource::Quick => (prompt::quick_request(req, advisory), advisory.quick_timeout_secs),
            AdvisorySource::Deep => (prompt::deep_request(req, advisory), advisory.deep_timeout_secs),
        };

        self.metrics.record_advisory_call();
        let timeout = Duration::from_secs_f64(timeout_secs.max(0.1));
        let reply = match tokio::time::timeout(timeout, backend.complete(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(AppError::AdvisoryTimeout(timeout_secs)),
        };

        let parsed = reply.and_then(|text| match source {
            AdvisorySource::Quick => parse::parse_quick(&text),
            AdvisorySource::Deep => parse::parse_deep(&text),
        });

        match parsed {
            Ok(opinion) => {
                self.metrics.record_advisory_success();
                info!(
                    "Advisory {:?} for {}: {:?} (pattern {}, confidence {:.0})",
                    source, req.symbol, opinion.decision, opinion.pattern, opinion.confidence
                );
                Some(opinion)
            }
            Err(e) => {
                if matches!(e, AppError::AdvisoryTimeout(_)) {
                    self.metrics.record_advisory_timeout();
                } else {
                    self.metrics.record_advisory_error();
                }
                warn!("Advisory {:?} via {} failed for {}: {}", source, backend.name(), req.symbol, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdvisoryDecision;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        quick_reply: String,
        deep_reply: String,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(quick_reply: &str, deep_reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                quick_reply: quick_reply.to_string(),
                deep_reply: deep_reply.to_string(),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl AdvisoryBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(match request.source {
                    AdvisorySource::Quick => self.quick_reply.clone(),
                    AdvisorySource::Deep => self.deep_reply.clone(),
                })
            })
        }
    }

    fn request(symbol: &str, ta_score: f64, ta_confidence: f64) -> AdvisoryRequest {
        AdvisoryRequest {
            symbol: symbol.to_string(),
            candles: Vec::new(),
            indicators: IndicatorSnapshot::neutral(1.08),
            price: 1.08,
            candidate: Action::Buy,
            ta_score,
            ta_confidence,
            buy_threshold: 60.0,
            sell_threshold: 40.0,
        }
    }

    fn layer(backend: Arc<FakeBackend>) -> (Arc<AdvisoryLayer>, Arc<PipelineMetrics>) {
        let metrics = PipelineMetrics::new();
        let backend: Arc<dyn AdvisoryBackend> = backend;
        let layer = AdvisoryLayer::new(Some(backend), SharedConfig::new(Config::default()), metrics.clone());
        (layer, metrics)
    }

    const DEEP_BUY: &str = r#"{"decision":"BUY","pattern":"hammer","confidence":75,"comment":"Hammer at support"}"#;

    // =========================================================================
    // Gate
    // =========================================================================

    #[test]
    fn test_gate() {
        let cfg = AdvisoryConfig::default();
        assert!(passes_gate(&request("EURUSD", 63.0, 60.0), &cfg));
        assert!(!passes_gate(&request("EURUSD", 62.9, 80.0), &cfg));
        assert!(!passes_gate(&request("EURUSD", 70.0, 59.0), &cfg));

        let sell = AdvisoryRequest { candidate: Action::Sell, ta_score: 37.0, ..request("EURUSD", 0.0, 70.0) };
        assert!(passes_gate(&sell, &cfg));
        let none = AdvisoryRequest { candidate: Action::NoSignal, ..request("EURUSD", 90.0, 90.0) };
        assert!(!passes_gate(&none, &cfg));
    }

    #[tokio::test]
    async fn test_gate_failure_skips_backend() {
        let backend = FakeBackend::new("BUY", DEEP_BUY, Duration::ZERO);
        let (layer, _) = layer(backend.clone());
        assert!(layer.consult(&request("EURUSD", 61.0, 80.0)).await.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // Guards
    // =========================================================================

    #[tokio::test]
    async fn test_cooldown_blocks_second_call() {
        let backend = FakeBackend::new("BUY", DEEP_BUY, Duration::ZERO);
        let (layer, _) = layer(backend.clone());
        let req = request("EURUSD", 68.0, 62.0);

        let first = layer.consult(&req).await.unwrap();
        assert_eq!(first.decision, AdvisoryDecision::Buy);
        assert_eq!(first.pattern, "hammer");

        assert!(layer.consult(&req).await.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Other instruments have their own cooldown.
        assert!(layer.consult(&request("XAUUSD", 68.0, 62.0)).await.is_some());
    }

    #[test]
    fn test_guard_minute_and_hour_limits() {
        let guard = AdvisoryGuard::default();
        let cfg = AdvisoryConfig::default();
        let start = Instant::now();

        for i in 0..5 {
            assert!(guard.try_acquire(&format!("SYM{}", i), start, &cfg).is_ok());
        }
        assert_eq!(guard.try_acquire("SYM9", start, &cfg), Err(GuardRejection::MinuteLimit));

        // 30 calls spread over the hour exhaust the hourly budget.
        for i in 5..30 {
            let at = start + Duration::from_secs(61 * (i as u64 / 5));
            assert!(guard.try_acquire(&format!("SYM{}", i), at, &cfg).is_ok());
        }
        let later = start + Duration::from_secs(1000);
        assert_eq!(guard.try_acquire("NEW", later, &cfg), Err(GuardRejection::HourlyLimit));
        assert!(guard.try_acquire("NEW", start + Duration::from_secs(3600), &cfg).is_ok());
    }

    #[test]
    fn test_guard_cooldown_expires() {
        let guard = AdvisoryGuard::default();
        let cfg = AdvisoryConfig::default();
        let start = Instant::now();
        assert!(guard.try_acquire("EURUSD", start, &cfg).is_ok());
        assert_eq!(
            guard.try_acquire("EURUSD", start + Duration::from_secs(100), &cfg),
            Err(GuardRejection::Cooldown(Duration::from_secs(20)))
        );
        assert!(guard.try_acquire("EURUSD", start + Duration::from_secs(120), &cfg).is_ok());
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_none() {
        let backend = FakeBackend::new("BUY", DEEP_BUY, Duration::from_secs(30));
        let (layer, metrics) = layer(backend);
        assert!(layer.consult_deep(&request("EURUSD", 68.0, 62.0)).await.is_none());
        assert_eq!(metrics.snapshot().advisory_timeouts, 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_returns_none() {
        let backend = FakeBackend::new("", "I think it is going up", Duration::ZERO);
        let (layer, metrics) = layer(backend);
        let (quick, deep) = layer.consult_both(&request("EURUSD", 68.0, 62.0)).await;
        assert!(quick.is_none());
        assert!(deep.is_none());
        let snap = metrics.snapshot();
        assert_eq!(snap.advisory_calls, 2);
        assert_eq!(snap.advisory_errors, 2);
    }

    #[tokio::test]
    async fn test_quick_flavor_has_own_guard() {
        let backend = FakeBackend::new("SELL", DEEP_BUY, Duration::ZERO);
        let (layer, _) = layer(backend.clone());
        let req = request("EURUSD", 68.0, 62.0);
        assert!(layer.consult_deep(&req).await.is_some());
        let quick = layer.consult_quick(&req).await.unwrap();
        assert_eq!(quick.decision, AdvisoryDecision::Sell);
        assert_eq!(quick.directional_score(), 30.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_without_backend() {
        let layer = AdvisoryLayer::new(None, SharedConfig::new(Config::default()), PipelineMetrics::new());
        assert!(!layer.is_available());
        assert!(layer.consult(&request("EURUSD", 68.0, 62.0)).await.is_none());
    }
}
