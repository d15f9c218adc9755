//! Static instrument registry and symbol normalization.

use crate::error::{AppError, Result};
use serde::Serialize;

/// A tradable instrument with its provider-specific spellings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Canonical symbol, e.g. `EURUSD`.
    pub symbol: &'static str,
    /// Base currency or metal code.
    pub base: &'static str,
    /// Quote currency code.
    pub quote: &'static str,
    /// Twelve Data spelling, e.g. `EUR/USD`.
    pub twelve_data: &'static str,
    /// Binance trading pair, if a usable proxy exists.
    pub binance: Option<&'static str>,
    /// Price used when no market data could be fetched.
    pub fallback_price: f64,
}

/// All supported instruments.
pub const INSTRUMENTS: &[Instrument] = &[
    Instrument {
        symbol: "EURUSD",
        base: "EUR",
        quote: "USD",
        twelve_data: "EUR/USD",
        binance: Some("EURUSDT"),
        fallback_price: 1.08,
    },
    Instrument {
        symbol: "XAUUSD",
        base: "XAU",
        quote: "USD",
        twelve_data: "XAU/USD",
        binance: Some("PAXGUSDT"),
        fallback_price: 2700.0,
    },
    Instrument {
        symbol: "GBPUSD",
        base: "GBP",
        quote: "USD",
        twelve_data: "GBP/USD",
        binance: Some("GBPUSDT"),
        fallback_price: 1.27,
    },
    Instrument {
        symbol: "USDJPY",
        base: "USD",
        quote: "JPY",
        twelve_data: "USD/JPY",
        binance: None,
        fallback_price: 150.0,
    },
];

/// Canonicalize an accepted spelling (`eur/usd`, `EUR-USD`, ` xauusd `) to its registry symbol.
pub fn normalize(raw: &str) -> Result<&'static str> {
    lookup(raw).map(|i| i.symbol)
}

/// Resolve any accepted spelling to its registry entry.
pub fn lookup(raw: &str) -> Result<&'static Instrument> {
    let key: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' ' | '.'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    INSTRUMENTS
        .iter()
        .find(|i| i.symbol == key)
        .ok_or_else(|| AppError::UnsupportedInstrument(raw.trim().to_string()))
}
