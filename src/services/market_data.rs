//! Market data gateway.
//!
//! Fetches 1-minute candle series from the configured providers, either racing
//! them or walking them in order, with per-provider retry and an LRU cache
//! whose TTL shrinks as volatility grows.

use crate::config::{Config, GatewayConfig, SharedConfig};
use crate::error::{AppError, Result};
use crate::services::cache::{CacheEntry, TtlCache};
use crate::services::metrics::PipelineMetrics;
use crate::services::scoring::adaptive_cache_ttl;
use crate::services::signals::indicators::Atr;
use crate::services::signals::Indicator;
use crate::sources::{AlphaVantageClient, BinanceClient, CandleProvider, ProviderError, TwelveDataClient};
use crate::types::{lookup, CandleSeries, Instrument};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How providers are consulted on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// All providers concurrently; first usable series wins.
    Race,
    /// One provider at a time, in order.
    Sequential,
}

/// A cached series with the volatility snapshot that sized its TTL.
#[derive(Debug, Clone)]
pub struct CachedSeries {
    pub series: CandleSeries,
    pub atr: f64,
    pub price: f64,
}

pub struct MarketDataGateway {
    providers: Vec<Arc<dyn CandleProvider>>,
    mode: FetchMode,
    config: Arc<SharedConfig>,
    metrics: Arc<PipelineMetrics>,
    cache: TtlCache<&'static str, CachedSeries>,
}

/// Build the providers selected by `DATA_SOURCE` and the matching fetch mode.
///
/// `auto` enables every provider that has what it needs (API key or flag) and
/// races them. A provider name selects that provider alone.
pub fn configured_providers(config: &Config) -> (Vec<Arc<dyn CandleProvider>>, FetchMode) {
    let timeout = config.gateway.provider_timeout_secs;
    let mut all: Vec<Arc<dyn CandleProvider>> = Vec::new();

    if let Some(key) = &config.twelve_data_api_key {
        all.push(Arc::new(TwelveDataClient::new(key.clone(), timeout)));
    }
    if let Some(key) = &config.alpha_vantage_api_key {
        all.push(Arc::new(AlphaVantageClient::new(key.clone(), timeout)));
    }
    if config.binance_enabled {
        all.push(Arc::new(BinanceClient::new(timeout)));
    }

    match config.gateway.data_source.as_str() {
        "auto" => (all, FetchMode::Race),
        name => {
            let selected = all.into_iter().filter(|p| p.name() == name).collect();
            (selected, FetchMode::Sequential)
        }
    }
}

/// Fetch from one provider, retrying transient failures with exponential backoff.
async fn fetch_with_retry(
    provider: Arc<dyn CandleProvider>,
    instrument: &'static Instrument,
    cfg: GatewayConfig,
    metrics: Arc<PipelineMetrics>,
) -> std::result::Result<CandleSeries, ProviderError> {
    let attempts = cfg.max_retries.max(1);
    let timeout = Duration::from_secs_f64(cfg.provider_timeout_secs.max(0.1));
    let mut last_error = ProviderError::Transport("no attempt made".to_string());

    for attempt in 0..attempts {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, provider.fetch(instrument, cfg.lookback_window)).await {
            Ok(result) => result.and_then(|candles| {
                let series = CandleSeries::new(instrument.symbol, provider.name(), candles, cfg.lookback_window);
                if series.is_usable() {
                    Ok(series)
                } else {
                    Err(ProviderError::InsufficientData { got: series.len() })
                }
            }),
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs_f64())),
        };
        metrics.record_provider_call(provider.name(), started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(series) => {
                debug!(
                    "{} returned {} bars for {} on attempt {}",
                    provider.name(),
                    series.len(),
                    instrument.symbol,
                    attempt + 1
                );
                return Ok(series);
            }
            Err(e) if !e.is_transient() => {
                warn!("{} failed for {}: {}", provider.name(), instrument.symbol, e);
                return Err(e);
            }
            Err(e) => {
                if attempt + 1 < attempts {
                    let wait = cfg.backoff_base.max(0.0).powi(attempt as i32);
                    warn!(
                        "{} attempt {}/{} failed for {}: {}, retrying in {:.1}s",
                        provider.name(),
                        attempt + 1,
                        attempts,
                        instrument.symbol,
                        e,
                        wait
                    );
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                } else {
                    warn!(
                        "{} failed for {} after {} attempts: {}",
                        provider.name(),
                        instrument.symbol,
                        attempts,
                        e
                    );
                }
                last_error = e;
            }
        }
    }

    Err(last_error)
}

impl MarketDataGateway {
    /// Create a gateway. Having no provider at all is a configuration error.
    pub fn new(
        providers: Vec<Arc<dyn CandleProvider>>,
        mode: FetchMode,
        config: Arc<SharedConfig>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(AppError::Configuration("no market data provider configured".to_string()));
        }
        let capacity = config.snapshot().gateway.cache_max_size;
        Ok(Self {
            providers,
            mode,
            config,
            metrics,
            cache: TtlCache::new(capacity),
        })
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Recent candles for an instrument, from cache when fresh.
    pub async fn fetch(&self, raw_symbol: &str) -> Result<CandleSeries> {
        let instrument = lookup(raw_symbol)?;

        if let Some(cached) = self.cache.get(&instrument.symbol) {
            debug!("Candle cache hit for {}", instrument.symbol);
            self.metrics.record_cache(true);
            return Ok(cached.series);
        }
        self.metrics.record_cache(false);

        let cfg = self.config.snapshot();
        let result = match self.mode {
            FetchMode::Race => self.race(instrument, &cfg.gateway).await,
            FetchMode::Sequential => self.sequential(instrument, &cfg.gateway).await,
        };

        let series = result.map_err(|errors| {
            AppError::DataUnavailable(format!(
                "{}: all providers failed ({})",
                instrument.symbol,
                errors.join("; ")
            ))
        })?;

        self.store(instrument, series.clone(), &cfg.gateway);
        Ok(series)
    }

    /// Cached entry for a symbol if it is still fresh.
    pub fn cached(&self, raw_symbol: &str) -> Option<CacheEntry<CachedSeries>> {
        let instrument = lookup(raw_symbol).ok()?;
        self.cache.get_entry(&instrument.symbol)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop expired candle series.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    async fn race(
        &self,
        instrument: &'static Instrument,
        cfg: &GatewayConfig,
    ) -> std::result::Result<CandleSeries, Vec<String>> {
        let mut tasks: FuturesUnordered<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let name = provider.name().to_string();
                let cfg = cfg.clone();
                let metrics = Arc::clone(&self.metrics);
                tokio::spawn(async move { (name, fetch_with_retry(provider, instrument, cfg, metrics).await) })
            })
            .collect();

        let mut errors = Vec::new();
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok((name, Ok(series))) => {
                    info!("{} won the race for {} ({} bars)", name, instrument.symbol, series.len());
                    // Remaining tasks are detached; their results are ignored.
                    return Ok(series);
                }
                Ok((name, Err(e))) => errors.push(format!("{}: {}", name, e)),
                Err(e) => errors.push(format!("task failed: {}", e)),
            }
        }
        Err(errors)
    }

    async fn sequential(
        &self,
        instrument: &'static Instrument,
        cfg: &GatewayConfig,
    ) -> std::result::Result<CandleSeries, Vec<String>> {
        let mut errors = Vec::new();
        for provider in &self.providers {
            let result =
                fetch_with_retry(Arc::clone(provider), instrument, cfg.clone(), Arc::clone(&self.metrics)).await;
            match result {
                Ok(series) => return Ok(series),
                Err(e) => errors.push(format!("{}: {}", provider.name(), e)),
            }
        }
        Err(errors)
    }

    fn store(&self, instrument: &'static Instrument, series: CandleSeries, cfg: &GatewayConfig) {
        let price = series.last_close().unwrap_or(instrument.fallback_price);
        let atr = Atr::default()
            .calculate(series.candles())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(price * 0.001);
        let ttl = adaptive_cache_ttl(atr, price, cfg);

        self.cache.set_capacity(cfg.cache_max_size);
        if let Some(evicted) = self.cache.insert(instrument.symbol, CachedSeries { series, atr, price }, ttl) {
            debug!("Candle cache full, evicted {}", evicted);
        }
        debug!("Cached {} for {}s", instrument.symbol, ttl.as_secs());
    }
}
