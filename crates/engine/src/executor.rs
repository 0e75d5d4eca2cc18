use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};

use common::{
    AmountSpec, Error, ExchangeClient, Instrument, Order, OrderResult, OrderSize, Result,
    TradeIntent, TradingMode,
};

/// Turns trade intents into market orders and submits them to the exchange.
///
/// This is the ONLY component that calls `ExchangeClient::submit_order`.
/// Nothing is retried: a failed submission is reported as `Error::Execution`.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    instrument: Instrument,
    mode: TradingMode,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>, instrument: Instrument, mode: TradingMode) -> Self {
        Self {
            client,
            instrument,
            mode,
        }
    }

    /// Resolve an intent to a concrete market order.
    pub fn order_for(&self, intent: &TradeIntent) -> Result<Order> {
        let amount = intent.amount.amount();
        if amount <= Decimal::ZERO {
            return Err(Error::Execution(format!(
                "nothing to {}: available balance is {amount}",
                intent.side
            )));
        }
        let size = match intent.amount {
            AmountSpec::FullBase(qty) => OrderSize::Base(qty),
            AmountSpec::FullQuote(qty) => OrderSize::Quote(qty),
        };
        Ok(Order::market(self.instrument.symbol(), intent.side, size))
    }

    pub async fn execute(&self, intent: &TradeIntent) -> Result<OrderResult> {
        let order = self.order_for(intent).inspect_err(|e| {
            error!(pair = %self.instrument, error = %e, "Order not submitted");
        })?;
        info!(
            pair = %self.instrument,
            side = %order.side,
            size = ?order.size,
            mode = %self.mode,
            "Executing order"
        );

        match self.client.submit_order(&order).await {
            Ok(result) => {
                info!(
                    pair = %self.instrument,
                    status = %result.status,
                    qty = %result.executed_qty,
                    quote_qty = %result.quote_qty,
                    "Order executed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(pair = %self.instrument, error = %e, "Order submission failed");
                Err(match e {
                    Error::Execution(_) => e,
                    other => Error::Execution(other.to_string()),
                })
            }
        }
    }
}
