use axum::Router;
use omen::config::{Config, SharedConfig};
use omen::error::AppError;
use omen::services::{configured_providers, AdvisoryLayer, MarketDataGateway, PipelineMetrics};
use omen::types::SignalDirective;
use omen::{api, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scope shared by every emitted directive.
const EMISSION_SCOPE: &str = "signals";

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omen=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!("Starting Omen on {}:{}", config.host, config.port);

    let (providers, mode) = configured_providers(&config);
    if providers.is_empty() {
        error!("No market data provider available for DATA_SOURCE={}", config.gateway.data_source);
        return Err(AppError::Configuration(format!(
            "no market data provider available for DATA_SOURCE={}",
            config.gateway.data_source
        ))
        .into());
    }

    let shared = SharedConfig::new(config.clone());
    let metrics = PipelineMetrics::new();
    let gateway = MarketDataGateway::new(providers, mode, Arc::clone(&shared), Arc::clone(&metrics))?;
    info!("Market data: {:?} over {:?}", gateway.mode(), gateway.provider_names());

    let advisory = AdvisoryLayer::from_config(&config, Arc::clone(&shared), Arc::clone(&metrics));
    let state = AppState::new(shared, metrics, gateway, advisory);

    // Start the analysis loop
    {
        let state = state.clone();
        tokio::spawn(async move {
            run_analysis_loop(state).await;
        });
    }

    // Purge idle caller windows and expired series
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let callers = state.rate_limiter.purge_idle();
                let series = state.gateway.purge_expired();
                debug!("Purge pass: {} caller windows, {} cached series", callers, series);
            }
        });
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(api::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Omen server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Evaluate every configured instrument once per interval.
async fn run_analysis_loop(state: AppState) {
    loop {
        let cfg = state.config.snapshot();
        let ceiling = Duration::from_secs_f64(cfg.decision.decision_timeout_secs.max(0.1));

        for symbol in &cfg.instruments {
            let directive = state.engine.decide_within(symbol, ceiling).await;
            if !directive.is_actionable() {
                continue;
            }
            if state.rate_limiter.allow_emission(EMISSION_SCOPE) {
                notify(&directive);
            } else {
                warn!("Hourly emission cap reached, dropping {} {}", directive.action, directive.symbol);
            }
        }

        tokio::time::sleep(Duration::from_secs(cfg.decision.analysis_interval_secs.max(1))).await;
    }
}

fn notify(directive: &SignalDirective) {
    match serde_json::to_string(directive) {
        Ok(json) => info!(target: "omen::notify", "{}", json),
        Err(e) => warn!("Could not serialize directive {}: {}", directive.id, e),
    }
    if let Some(risk) = &directive.risk_params {
        info!(
            "SIGNAL {} {} @ {:.5} | SL {:.5} | TP {:.5} | expires {}s | confidence {:.1}%",
            directive.action,
            directive.symbol,
            directive.price,
            risk.stop_loss,
            risk.take_profit,
            risk.expiration_seconds,
            directive.confidence
        );
    }
}
