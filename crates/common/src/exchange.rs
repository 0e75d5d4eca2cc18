use async_trait::async_trait;

use crate::{Balances, Order, OrderResult, Result};

/// Abstraction over the exchange account.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// The strategy engine reads balances through it and only `OrderExecutor`
/// in `crates/engine` calls `submit_order`.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Point-in-time snapshot of available balances. No staleness guarantee.
    async fn balances(&self) -> Result<Balances>;

    /// Submit a market order and return the execution report.
    async fn submit_order(&self, order: &Order) -> Result<OrderResult>;
}
