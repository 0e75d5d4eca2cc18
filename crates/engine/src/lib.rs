pub mod binance;
pub mod executor;
pub mod lifecycle;

pub use binance::{BinanceClient, BinanceStream};
pub use executor::OrderExecutor;
pub use lifecycle::{EngineHandle, StrategyEngine};
