pub mod config;
pub mod trailing;
pub mod trigger;

pub use config::{SellSizing, StrategyFileConfig, TrailingConfig};
pub use trailing::{TrailingStop, Transition};
pub use trigger::{StopLossFired, StopTrigger, TriggerHandle, TriggerState};
