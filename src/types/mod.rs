pub mod candle;
pub mod instrument;
pub mod signal;

pub use candle::*;
pub use instrument::{lookup, normalize, Instrument, INSTRUMENTS};
pub use signal::*;
