use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Balances, Error, ExchangeClient, Instrument, Order, OrderResult, OrderSide, OrderSize,
    OrderStatus, Result,
};

/// Simulated exchange client for paper trading.
///
/// Market orders fill at the latest known price with configurable slippage
/// against in-memory base/quote balances. No real orders are ever sent.
pub struct PaperClient {
    instrument: Instrument,
    /// Simulated base/quote holdings.
    balances: Arc<RwLock<Balances>>,
    /// Latest known price, updated via `update_price`.
    last_price: Arc<RwLock<Option<Decimal>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: Decimal,
}

impl PaperClient {
    pub fn new(
        instrument: Instrument,
        base_balance: Decimal,
        quote_balance: Decimal,
        slippage_bps: Decimal,
    ) -> Self {
        info!(
            pair = %instrument,
            base = %base_balance,
            quote = %quote_balance,
            slippage_bps = %slippage_bps,
            "PaperClient initialized"
        );
        let balances = Balances::default()
            .with(&instrument.base, base_balance)
            .with(&instrument.quote, quote_balance);
        Self {
            instrument,
            balances: Arc::new(RwLock::new(balances)),
            last_price: Arc::new(RwLock::new(None)),
            slippage_bps,
        }
    }

    /// Update the latest price (called by the tick forwarding loop).
    pub async fn update_price(&self, price: Decimal) {
        *self.last_price.write().await = Some(price);
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn balances(&self) -> Result<Balances> {
        Ok(self.balances.read().await.clone())
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderResult> {
        if order.symbol != self.instrument.symbol() {
            return Err(Error::Exchange(format!(
                "PaperClient only trades {}, got '{}'",
                self.instrument.symbol(),
                order.symbol
            )));
        }
        let mid_price = (*self.last_price.read().await).ok_or_else(|| {
            Error::Exchange(format!(
                "PaperClient has no price for '{}'. Ensure ticks are flowing.",
                order.symbol
            ))
        })?;

        // Apply slippage: buys pay more, sells receive less
        let slip = self.slippage_bps / Decimal::from(10_000);
        let fill_price = match order.side {
            OrderSide::Buy => mid_price * (Decimal::ONE + slip),
            OrderSide::Sell => mid_price * (Decimal::ONE - slip),
        };

        let Instrument { base, quote } = &self.instrument;
        let mut balances = self.balances.write().await;
        let base_held = balances.available(base);
        let quote_held = balances.available(quote);

        let (base_qty, quote_qty) = match order.size {
            OrderSize::Base(qty) => (qty, qty * fill_price),
            OrderSize::Quote(amount) => (amount / fill_price, amount),
        };

        let (new_base, new_quote) = match order.side {
            OrderSide::Buy => (base_held + base_qty, quote_held - quote_qty),
            OrderSide::Sell => (base_held - base_qty, quote_held + quote_qty),
        };
        if new_base < Decimal::ZERO || new_quote < Decimal::ZERO {
            return Err(Error::Exchange(format!(
                "insufficient balance for {} {base_qty} {base} ({base_held} {base}, {quote_held} {quote} held)",
                order.side
            )));
        }
        *balances = std::mem::take(&mut *balances)
            .with(base, new_base)
            .with(quote, new_quote);

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid = %mid_price,
            fill = %fill_price,
            qty = %base_qty,
            "Paper fill simulated"
        );

        Ok(OrderResult {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Filled,
            executed_qty: base_qty,
            quote_qty,
            timestamp: Utc::now(),
        })
    }
}
