use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The traded pair, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub base: String,
    pub quote: String,
}

impl Instrument {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Exchange symbol with no separator, e.g. `ETHEUR`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// One observed price sample. Neither prices nor timestamps are assumed
/// to be unique or increasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// How much a trade intent spends, with the balance snapshot it was sized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmountSpec {
    /// Entire available base-asset balance.
    FullBase(Decimal),
    /// Entire available quote-asset balance.
    FullQuote(Decimal),
}

impl AmountSpec {
    pub fn amount(&self) -> Decimal {
        match self {
            AmountSpec::FullBase(a) | AmountSpec::FullQuote(a) => *a,
        }
    }
}

/// A one-shot trade command produced by a strategy transition.
/// Issued once and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub side: OrderSide,
    pub amount: AmountSpec,
}

impl TradeIntent {
    pub fn buy_with_quote(quote_available: Decimal) -> Self {
        Self {
            side: OrderSide::Buy,
            amount: AmountSpec::FullQuote(quote_available),
        }
    }

    pub fn sell_base(base_available: Decimal) -> Self {
        Self {
            side: OrderSide::Sell,
            amount: AmountSpec::FullBase(base_available),
        }
    }
}

/// Order size, denominated either in the base asset or in the quote asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSize {
    Base(Decimal),
    Quote(Decimal),
}

/// A market order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: OrderSize,
}

impl Order {
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: OrderSize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
            OrderStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Execution report returned by the exchange for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Filled quantity in base-asset units.
    pub executed_qty: Decimal,
    /// Filled notional in quote-asset units.
    pub quote_qty: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub available: Decimal,
}

/// Point-in-time balance snapshot keyed by asset symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances(pub HashMap<String, AssetBalance>);

impl Balances {
    pub fn with(mut self, asset: &str, available: Decimal) -> Self {
        self.0.insert(asset.to_uppercase(), AssetBalance { available });
        self
    }

    /// Available amount of `asset`; assets the account never held count as zero.
    pub fn available(&self, asset: &str) -> Decimal {
        self.0
            .get(&asset.to_uppercase())
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Whether a base-asset holding is currently protected by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Flat,
    Long,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Flat => write!(f, "FLAT"),
            Position::Long => write!(f, "LONG"),
        }
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

/// Identity of one armed stop-loss trigger. Allocated sequentially per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerId(pub u64);

impl std::fmt::Display for TriggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events emitted by the strategy engine for operator visibility.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyEvent {
    Started {
        position: Position,
    },
    NewHigh {
        high_water_mark: Decimal,
        stop_price: Decimal,
    },
    TriggerArmed {
        id: TriggerId,
        stop_price: Decimal,
        base_balance: Decimal,
    },
    TriggerCancelled {
        id: TriggerId,
    },
    /// Price fell to the stop; the stop-loss sell follows.
    TriggerFired {
        id: TriggerId,
        price: Decimal,
    },
    /// New all-time high while flat; the buy follows.
    BuySignal {
        price: Decimal,
    },
    OrderSubmitted {
        intent: TradeIntent,
        result: OrderResult,
    },
    OrderFailed {
        intent: TradeIntent,
        error: String,
    },
    Error {
        error: String,
    },
}

impl StrategyEvent {
    /// Whether the event is worth an out-of-band notification.
    /// Trigger bookkeeping is logged only.
    pub fn is_notable(&self) -> bool {
        !matches!(
            self,
            StrategyEvent::NewHigh { .. }
                | StrategyEvent::TriggerArmed { .. }
                | StrategyEvent::TriggerCancelled { .. }
        )
    }

    /// Render as a `(title, message)` pair for a `Notifier`.
    pub fn describe(&self, instrument: &Instrument) -> (String, String) {
        let Instrument { base, quote } = instrument;
        match self {
            StrategyEvent::Started { position } => (
                "Started".to_string(),
                format!("Trailing stop on {instrument}. Start position is {position}."),
            ),
            StrategyEvent::NewHigh {
                high_water_mark,
                stop_price,
            } => (
                "New high".to_string(),
                format!("{base} reached {high_water_mark} {quote}. Stop now at {stop_price}."),
            ),
            StrategyEvent::TriggerArmed { id, stop_price, .. } => (
                "Stop armed".to_string(),
                format!("Stop {id} armed at {stop_price} {quote} on {instrument}."),
            ),
            StrategyEvent::TriggerCancelled { id } => (
                "Stop cancelled".to_string(),
                format!("Stop {id} on {instrument} superseded."),
            ),
            StrategyEvent::TriggerFired { price, .. } => (
                "Price Trigger".to_string(),
                format!("{base} price has fallen and is now {price} {quote} on {instrument}"),
            ),
            StrategyEvent::BuySignal { price } => (
                "Price Trigger".to_string(),
                format!("{base} price has risen and is now {price} {quote} on {instrument}"),
            ),
            StrategyEvent::OrderSubmitted { intent, result } => (
                "Order executed".to_string(),
                format!(
                    "Order to {} {} {base} placed. Result: {}",
                    intent.side, result.executed_qty, result.status
                ),
            ),
            StrategyEvent::OrderFailed { intent, error } => (
                "Order failed".to_string(),
                format!("Order to {} on {instrument} failed: {error}", intent.side),
            ),
            StrategyEvent::Error { error } => ("Error".to_string(), error.clone()),
        }
    }
}

/// Read-only view of the strategy state for status queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub position: Position,
    pub high_water_mark: Decimal,
    pub stop_price: Decimal,
    pub active_trigger: Option<TriggerId>,
    pub last_price: Option<Decimal>,
}
