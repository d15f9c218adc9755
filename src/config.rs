use crate::error::{AppError, Result};
use serde::Serialize;
use std::env;
use std::sync::{Arc, RwLock};

/// Candle acquisition and cache settings.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayConfig {
    /// `auto` races every configured provider, otherwise the named provider is used alone.
    pub data_source: String,
    /// Bars kept per series.
    pub lookback_window: usize,
    pub max_retries: u32,
    /// Backoff between attempts is `backoff_base ^ attempt` seconds.
    pub backoff_base: f64,
    pub provider_timeout_secs: f64,
    pub cache_max_size: usize,
    pub cache_ttl_secs: u64,
    pub cache_min_ttl_secs: u64,
    pub cache_max_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_source: "auto".to_string(),
            lookback_window: 60,
            max_retries: 3,
            backoff_base: 2.0,
            provider_timeout_secs: 10.0,
            cache_max_size: 10,
            cache_ttl_secs: 90,
            cache_min_ttl_secs: 30,
            cache_max_ttl_secs: 180,
        }
    }
}

/// Indicator engine settings.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorConfig {
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
    /// Bars hashed into the cache fingerprint.
    pub fingerprint_bars: usize,
    /// Bars used for short-term momentum.
    pub momentum_periods: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            cache_size: 5,
            fingerprint_bars: 10,
            momentum_periods: 3,
        }
    }
}

/// Indicator levels used by the scoring rules.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub bb_oversold: f64,
    pub bb_overbought: f64,
    pub bb_strong_oversold: f64,
    pub bb_strong_overbought: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub stoch_strong_oversold: f64,
    pub stoch_strong_overbought: f64,
    pub adx_trend_threshold: f64,
    pub macd_strong_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 40.0,
            rsi_overbought: 60.0,
            bb_oversold: 30.0,
            bb_overbought: 70.0,
            bb_strong_oversold: 20.0,
            bb_strong_overbought: 80.0,
            stoch_oversold: 30.0,
            stoch_overbought: 70.0,
            stoch_strong_oversold: 20.0,
            stoch_strong_overbought: 80.0,
            adx_trend_threshold: 25.0,
            macd_strong_threshold: 0.0002,
        }
    }
}

/// Acceptance rules for the final decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionConfig {
    pub min_signal_score: f64,
    pub max_sell_score: f64,
    pub min_confidence: f64,
    pub momentum_penalty_score: f64,
    pub momentum_penalty_confidence: f64,
    /// Weight of the quick advisory score on the momentum-gated path.
    pub advisory_weight: f64,
    pub advisory_weight_min: f64,
    pub advisory_weight_max: f64,
    /// Confidence blend when a deep opinion confirms the candidate.
    pub ta_blend_weight: f64,
    pub advisory_blend_weight: f64,
    pub decision_timeout_secs: f64,
    pub analysis_interval_secs: u64,
    pub error_message_max_length: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_signal_score: 60.0,
            max_sell_score: 40.0,
            min_confidence: 60.0,
            momentum_penalty_score: 7.0,
            momentum_penalty_confidence: 5.0,
            advisory_weight: 0.10,
            advisory_weight_min: 0.05,
            advisory_weight_max: 0.15,
            ta_blend_weight: 0.7,
            advisory_blend_weight: 0.3,
            decision_timeout_secs: 30.0,
            analysis_interval_secs: 120,
            error_message_max_length: 100,
        }
    }
}

/// ATR% buckets mapped to directive lifetimes.
#[derive(Debug, Clone, Serialize)]
pub struct ExpirationConfig {
    pub very_low_threshold: f64,
    pub low_threshold: f64,
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub very_high_threshold: f64,
    pub low_vol_minutes: u64,
    pub medium_vol_minutes: u64,
    pub high_vol_minutes: u64,
    pub max_minutes: u64,
    /// Allowed lifetimes in seconds, ascending.
    pub allowed_seconds: Vec<u64>,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            very_low_threshold: 0.05,
            low_threshold: 0.10,
            medium_threshold: 0.20,
            high_threshold: 0.40,
            very_high_threshold: 0.80,
            low_vol_minutes: 3,
            medium_vol_minutes: 2,
            high_vol_minutes: 1,
            max_minutes: 3,
            allowed_seconds: vec![5, 10, 30, 60, 120, 180],
        }
    }
}

/// Stop-loss / take-profit sizing.
#[derive(Debug, Clone, Serialize)]
pub struct RiskConfig {
    pub atr_sl_multiplier: f64,
    pub atr_tp_multiplier: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub expiration: ExpirationConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            atr_sl_multiplier: 2.0,
            atr_tp_multiplier: 2.5,
            stop_loss_pct: 0.002,
            take_profit_pct: 0.002,
            expiration: ExpirationConfig::default(),
        }
    }
}

/// External reasoning service settings.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub quick_enabled: bool,
    pub deep_enabled: bool,
    pub model: String,
    pub quick_timeout_secs: f64,
    pub deep_timeout_secs: f64,
    /// How long the decision engine waits for opinions before finalizing.
    pub wait_budget_secs: f64,
    pub calls_per_minute: usize,
    pub calls_per_hour: usize,
    pub cooldown_secs: u64,
    /// Points by which the TA score must clear its threshold.
    pub min_gap: f64,
    pub min_ta_confidence: f64,
    pub min_advisory_confidence: f64,
    pub candles_in_prompt: usize,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quick_enabled: true,
            deep_enabled: true,
            model: "gpt-4o-mini".to_string(),
            quick_timeout_secs: 3.0,
            deep_timeout_secs: 5.0,
            wait_budget_secs: 6.0,
            calls_per_minute: 5,
            calls_per_hour: 30,
            cooldown_secs: 120,
            min_gap: 3.0,
            min_ta_confidence: 60.0,
            min_advisory_confidence: 60.0,
            candles_in_prompt: 15,
        }
    }
}

/// Emission and caller throttling.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitConfig {
    pub max_signals_per_hour: usize,
    pub max_user_commands_per_minute: usize,
    pub command_window_secs: u64,
    pub idle_purge_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_signals_per_hour: 12,
            max_user_commands_per_minute: 10,
            command_window_secs: 60,
            idle_purge_secs: 3600,
        }
    }
}

/// UTC window in which directives may be issued.
#[derive(Debug, Clone, Serialize)]
pub struct TradingHoursConfig {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 0,
            end_hour: 24,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Instruments analysed by the background loop.
    pub instruments: Vec<String>,
    #[serde(skip)]
    pub twelve_data_api_key: Option<String>,
    #[serde(skip)]
    pub alpha_vantage_api_key: Option<String>,
    /// Binance klines need no key; this only switches the provider on or off.
    pub binance_enabled: bool,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub gateway: GatewayConfig,
    pub indicators: IndicatorConfig,
    pub thresholds: ThresholdConfig,
    pub decision: DecisionConfig,
    pub risk: RiskConfig,
    pub advisory: AdvisoryConfig,
    pub rate_limit: RateLimitConfig,
    pub trading_hours: TradingHoursConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            instruments: vec!["EURUSD".to_string(), "XAUUSD".to_string()],
            twelve_data_api_key: None,
            alpha_vantage_api_key: None,
            binance_enabled: true,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gateway: GatewayConfig::default(),
            indicators: IndicatorConfig::default(),
            thresholds: ThresholdConfig::default(),
            decision: DecisionConfig::default(),
            risk: RiskConfig::default(),
            advisory: AdvisoryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            trading_hours: TradingHoursConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let d = Config::default();

        let instruments = env::var("INSTRUMENTS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|i| i.trim().to_string())
                    .filter(|i| !i.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(d.instruments);

        Self {
            host: env::var("HOST").unwrap_or(d.host),
            port: env_parse("PORT", d.port),
            instruments,
            twelve_data_api_key: env::var("TWELVE_DATA_API_KEY").ok().filter(|k| !k.is_empty()),
            alpha_vantage_api_key: env::var("ALPHA_VANTAGE_API_KEY").ok().filter(|k| !k.is_empty()),
            binance_enabled: env_flag("BINANCE_ENABLED", d.binance_enabled),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(d.openai_base_url),
            gateway: GatewayConfig {
                data_source: env::var("DATA_SOURCE")
                    .map(|s| s.to_lowercase())
                    .unwrap_or(d.gateway.data_source),
                lookback_window: env_parse("LOOKBACK_WINDOW", d.gateway.lookback_window),
                max_retries: env_parse("MAX_RETRIES", d.gateway.max_retries),
                backoff_base: env_parse("BACKOFF_BASE", d.gateway.backoff_base),
                provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", d.gateway.provider_timeout_secs),
                cache_max_size: env_parse("CACHE_MAX_SIZE", d.gateway.cache_max_size),
                cache_ttl_secs: env_parse("CACHE_TTL_SECS", d.gateway.cache_ttl_secs),
                cache_min_ttl_secs: env_parse("CACHE_MIN_TTL_SECS", d.gateway.cache_min_ttl_secs),
                cache_max_ttl_secs: env_parse("CACHE_MAX_TTL_SECS", d.gateway.cache_max_ttl_secs),
            },
            indicators: IndicatorConfig {
                cache_ttl_secs: env_parse("INDICATOR_CACHE_TTL_SECONDS", d.indicators.cache_ttl_secs),
                cache_size: env_parse("INDICATOR_CACHE_SIZE", d.indicators.cache_size),
                ..d.indicators
            },
            thresholds: ThresholdConfig {
                adx_trend_threshold: env_parse("ADX_TREND_THRESHOLD", d.thresholds.adx_trend_threshold),
                macd_strong_threshold: env_parse("MACD_STRONG_THRESHOLD", d.thresholds.macd_strong_threshold),
                ..d.thresholds
            },
            decision: DecisionConfig {
                min_signal_score: env_parse("MIN_SIGNAL_SCORE", d.decision.min_signal_score),
                max_sell_score: env_parse("MAX_SELL_SCORE", d.decision.max_sell_score),
                min_confidence: env_parse("MIN_CONFIDENCE", d.decision.min_confidence),
                advisory_weight: env_parse("ADVISORY_WEIGHT", d.decision.advisory_weight),
                decision_timeout_secs: env_parse("DECISION_TIMEOUT_SECS", d.decision.decision_timeout_secs),
                analysis_interval_secs: env_parse("ANALYSIS_INTERVAL_SECS", d.decision.analysis_interval_secs),
                ..d.decision
            },
            risk: RiskConfig {
                atr_sl_multiplier: env_parse("ATR_SL_MULTIPLIER", d.risk.atr_sl_multiplier),
                atr_tp_multiplier: env_parse("ATR_TP_MULTIPLIER", d.risk.atr_tp_multiplier),
                ..d.risk
            },
            advisory: AdvisoryConfig {
                enabled: env_flag("ADVISORY_ENABLED", d.advisory.enabled),
                quick_enabled: env_flag("ADVISORY_QUICK_ENABLED", d.advisory.quick_enabled),
                deep_enabled: env_flag("ADVISORY_DEEP_ENABLED", d.advisory.deep_enabled),
                model: env::var("ADVISORY_MODEL").unwrap_or(d.advisory.model),
                cooldown_secs: env_parse("ADVISORY_COOLDOWN_SECS", d.advisory.cooldown_secs),
                ..d.advisory
            },
            rate_limit: RateLimitConfig {
                max_signals_per_hour: env_parse("MAX_SIGNALS_PER_HOUR", d.rate_limit.max_signals_per_hour),
                max_user_commands_per_minute: env_parse(
                    "MAX_USER_COMMANDS_PER_MINUTE",
                    d.rate_limit.max_user_commands_per_minute,
                ),
                ..d.rate_limit
            },
            trading_hours: TradingHoursConfig {
                enabled: env_flag("TRADING_HOURS_ENABLED", d.trading_hours.enabled),
                start_hour: env_parse("TRADING_START_HOUR", d.trading_hours.start_hour),
                end_hour: env_parse("TRADING_END_HOUR", d.trading_hours.end_hour),
            },
        }
    }

    /// Check cross-field constraints after loading.
    pub fn validate(&self) -> Result<()> {
        if self.decision.max_sell_score >= self.decision.min_signal_score {
            return Err(AppError::Configuration(format!(
                "max_sell_score ({}) must be below min_signal_score ({})",
                self.decision.max_sell_score, self.decision.min_signal_score
            )));
        }
        if self.decision.advisory_weight_min > self.decision.advisory_weight_max {
            return Err(AppError::Configuration(
                "advisory_weight_min must not exceed advisory_weight_max".to_string(),
            ));
        }
        if self.gateway.cache_max_size == 0 || self.indicators.cache_size == 0 {
            return Err(AppError::Configuration("cache sizes must be positive".to_string()));
        }
        if self.risk.expiration.allowed_seconds.is_empty() {
            return Err(AppError::Configuration("no allowed expirations configured".to_string()));
        }
        Ok(())
    }

    /// Advisory weight clamped into its configured band.
    pub fn effective_advisory_weight(&self) -> f64 {
        let d = &self.decision;
        d.advisory_weight.clamp(d.advisory_weight_min, d.advisory_weight_max)
    }
}

fn in_range(key: &str, value: f64, min: f64, max: f64) -> Result<f64> {
    if !value.is_finite() || value < min || value > max {
        return Err(AppError::BadRequest(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }
    Ok(value)
}

fn positive_count(key: &str, value: f64) -> Result<usize> {
    let v = in_range(key, value, 1.0, 1_000_000.0)?;
    if v.fract() != 0.0 {
        return Err(AppError::BadRequest(format!("{} must be a whole number", key)));
    }
    Ok(v as usize)
}

/// Runtime-mutable configuration behind a single update lock.
pub struct SharedConfig {
    inner: RwLock<Arc<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Arc::new(config)),
        })
    }

    /// Consistent view of the configuration for one pipeline step.
    pub fn snapshot(&self) -> Arc<Config> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate and apply one named tunable.
    pub fn update(&self, key: &str, value: f64) -> Result<()> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();

        match key {
            "min_signal_score" => next.decision.min_signal_score = in_range(key, value, 0.0, 100.0)?,
            "max_sell_score" => next.decision.max_sell_score = in_range(key, value, 0.0, 100.0)?,
            "min_confidence" => next.decision.min_confidence = in_range(key, value, 0.0, 100.0)?,
            "momentum_penalty_score" => {
                next.decision.momentum_penalty_score = in_range(key, value, 0.0, 100.0)?
            }
            "momentum_penalty_confidence" => {
                next.decision.momentum_penalty_confidence = in_range(key, value, 0.0, 100.0)?
            }
            "advisory_weight" => {
                let (min, max) = (next.decision.advisory_weight_min, next.decision.advisory_weight_max);
                next.decision.advisory_weight = in_range(key, value, min, max)?
            }
            "advisory_weight_min" => next.decision.advisory_weight_min = in_range(key, value, 0.0, 1.0)?,
            "advisory_weight_max" => next.decision.advisory_weight_max = in_range(key, value, 0.0, 1.0)?,
            "rsi_oversold" => next.thresholds.rsi_oversold = in_range(key, value, 0.0, 100.0)?,
            "rsi_overbought" => next.thresholds.rsi_overbought = in_range(key, value, 0.0, 100.0)?,
            "bb_oversold" => next.thresholds.bb_oversold = in_range(key, value, 0.0, 100.0)?,
            "bb_overbought" => next.thresholds.bb_overbought = in_range(key, value, 0.0, 100.0)?,
            "stoch_oversold" => next.thresholds.stoch_oversold = in_range(key, value, 0.0, 100.0)?,
            "stoch_overbought" => next.thresholds.stoch_overbought = in_range(key, value, 0.0, 100.0)?,
            "adx_trend_threshold" => next.thresholds.adx_trend_threshold = in_range(key, value, 0.0, 100.0)?,
            "macd_strong_threshold" => next.thresholds.macd_strong_threshold = in_range(key, value, 0.0, 1.0)?,
            "atr_sl_multiplier" => next.risk.atr_sl_multiplier = in_range(key, value, 0.1, 10.0)?,
            "atr_tp_multiplier" => next.risk.atr_tp_multiplier = in_range(key, value, 0.1, 10.0)?,
            "expiration_very_low_threshold" => {
                next.risk.expiration.very_low_threshold = in_range(key, value, 0.0, 100.0)?
            }
            "expiration_low_threshold" => next.risk.expiration.low_threshold = in_range(key, value, 0.0, 100.0)?,
            "expiration_medium_threshold" => {
                next.risk.expiration.medium_threshold = in_range(key, value, 0.0, 100.0)?
            }
            "expiration_high_threshold" => next.risk.expiration.high_threshold = in_range(key, value, 0.0, 100.0)?,
            "expiration_very_high_threshold" => {
                next.risk.expiration.very_high_threshold = in_range(key, value, 0.0, 100.0)?
            }
            "cache_max_size" => next.gateway.cache_max_size = positive_count(key, value)?,
            "indicator_cache_ttl_seconds" => {
                next.indicators.cache_ttl_secs = positive_count(key, value)? as u64
            }
            "max_signals_per_hour" => next.rate_limit.max_signals_per_hour = positive_count(key, value)?,
            "max_user_commands_per_minute" => {
                next.rate_limit.max_user_commands_per_minute = positive_count(key, value)?
            }
            "advisory_quick_timeout" => next.advisory.quick_timeout_secs = in_range(key, value, 0.1, 30.0)?,
            "advisory_deep_timeout" => next.advisory.deep_timeout_secs = in_range(key, value, 0.1, 30.0)?,
            "advisory_enabled" => next.advisory.enabled = value != 0.0,
            _ => return Err(AppError::BadRequest(format!("Unknown config key: {}", key))),
        }

        next.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
        *guard = Arc::new(next);
        Ok(())
    }
}
