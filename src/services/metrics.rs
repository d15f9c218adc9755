//! Pipeline counters.
//!
//! Lock-free counters bumped from the hot path and read by the health endpoint.

use crate::types::Action;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ProviderState {
    calls: AtomicU64,
    errors: AtomicU64,
    total_response_ms: AtomicU64,
}

/// Per-provider summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub name: String,
    pub calls: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
}

/// Serializable view of all counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub provider_calls: u64,
    pub provider_errors: u64,
    pub avg_response_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub indicator_cache_hits: u64,
    pub directives_buy: u64,
    pub directives_sell: u64,
    pub directives_no_signal: u64,
    pub advisory_calls: u64,
    pub advisory_successes: u64,
    pub advisory_errors: u64,
    pub advisory_timeouts: u64,
    pub advisory_vetoes: u64,
    pub providers: Vec<ProviderStats>,
}

/// Counters shared by every pipeline component.
#[derive(Default)]
pub struct PipelineMetrics {
    providers: DashMap<String, ProviderState>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    indicator_cache_hits: AtomicU64,
    directives_buy: AtomicU64,
    directives_sell: AtomicU64,
    directives_no_signal: AtomicU64,
    advisory_calls: AtomicU64,
    advisory_successes: AtomicU64,
    advisory_errors: AtomicU64,
    advisory_timeouts: AtomicU64,
    advisory_vetoes: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_provider_call(&self, provider: &str, elapsed: Duration, ok: bool) {
        let state = self.providers.entry(provider.to_string()).or_default();
        bump(&state.calls);
        if !ok {
            bump(&state.errors);
        }
        state
            .total_response_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        bump(if hit { &self.cache_hits } else { &self.cache_misses });
    }

    pub fn record_indicator_cache_hit(&self) {
        bump(&self.indicator_cache_hits);
    }

    pub fn record_directive(&self, action: Action) {
        bump(match action {
            Action::Buy => &self.directives_buy,
            Action::Sell => &self.directives_sell,
            Action::NoSignal => &self.directives_no_signal,
        });
    }

    pub fn record_advisory_call(&self) {
        bump(&self.advisory_calls);
    }

    pub fn record_advisory_success(&self) {
        bump(&self.advisory_successes);
    }

    pub fn record_advisory_error(&self) {
        bump(&self.advisory_errors);
    }

    pub fn record_advisory_timeout(&self) {
        bump(&self.advisory_timeouts);
    }

    pub fn record_advisory_veto(&self) {
        bump(&self.advisory_vetoes);
    }

    /// Total calls made to one provider.
    pub fn provider_calls(&self, provider: &str) -> u64 {
        self.providers
            .get(provider)
            .map(|s| s.calls.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut providers: Vec<ProviderStats> = self
            .providers
            .iter()
            .map(|entry| {
                let calls = entry.calls.load(Ordering::Relaxed);
                let total = entry.total_response_ms.load(Ordering::Relaxed);
                ProviderStats {
                    name: entry.key().clone(),
                    calls,
                    errors: entry.errors.load(Ordering::Relaxed),
                    avg_response_ms: if calls > 0 { total as f64 / calls as f64 } else { 0.0 },
                }
            })
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));

        let provider_calls: u64 = providers.iter().map(|p| p.calls).sum();
        let provider_errors: u64 = providers.iter().map(|p| p.errors).sum();
        let total_ms: f64 = providers.iter().map(|p| p.avg_response_ms * p.calls as f64).sum();

        MetricsSnapshot {
            provider_calls,
            provider_errors,
            avg_response_ms: if provider_calls > 0 { total_ms / provider_calls as f64 } else { 0.0 },
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            indicator_cache_hits: self.indicator_cache_hits.load(Ordering::Relaxed),
            directives_buy: self.directives_buy.load(Ordering::Relaxed),
            directives_sell: self.directives_sell.load(Ordering::Relaxed),
            directives_no_signal: self.directives_no_signal.load(Ordering::Relaxed),
            advisory_calls: self.advisory_calls.load(Ordering::Relaxed),
            advisory_successes: self.advisory_successes.load(Ordering::Relaxed),
            advisory_errors: self.advisory_errors.load(Ordering::Relaxed),
            advisory_timeouts: self.advisory_timeouts.load(Ordering::Relaxed),
            advisory_vetoes: self.advisory_vetoes.load(Ordering::Relaxed),
            providers,
        }
    }
}
