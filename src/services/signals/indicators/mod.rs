//! Technical indicator implementations.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod rsi;
pub mod stochastic;

pub use adx::Adx;
pub use atr::Atr;
pub use bollinger::BollingerBands;
pub use macd::Macd;
pub use rsi::Rsi;
pub use stochastic::Stochastic;
