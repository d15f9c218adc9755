use crate::config::TradingHoursConfig;
use chrono::{DateTime, Timelike, Utc};

/// Whether `now` falls inside the configured UTC trading window.
///
/// A window with `start_hour >= end_hour` wraps past midnight.
pub fn is_trading_hours(cfg: &TradingHoursConfig, now: DateTime<Utc>) -> bool {
    if !cfg.enabled {
        return true;
    }
    let hour = now.hour();
    if cfg.start_hour < cfg.end_hour {
        cfg.start_hour <= hour && hour < cfg.end_hour
    } else {
        hour >= cfg.start_hour || hour < cfg.end_hour
    }
}
