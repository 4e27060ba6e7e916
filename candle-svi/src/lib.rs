pub mod svi;

pub use candle_core;
pub use candle_nn;
