use rust_decimal::Decimal;
use tracing::{debug, info};

use common::{Error, Position, Result, StrategySnapshot, Tick, TradeIntent, TriggerId};

use crate::trigger::{StopLossFired, StopTrigger};

/// What a new all-time high led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Long: the stop moved up under the new high.
    Rearmed {
        cancelled: Option<TriggerId>,
        armed: TriggerId,
        stop_price: Decimal,
        base_balance: Decimal,
    },
    /// Flat: the new high is the buy signal. Position is already `Long`.
    Buy {
        cancelled: Option<TriggerId>,
        intent: TradeIntent,
    },
}

impl Transition {
    pub fn cancelled(&self) -> Option<TriggerId> {
        match self {
            Transition::Rearmed { cancelled, .. } | Transition::Buy { cancelled, .. } => {
                *cancelled
            }
        }
    }
}

/// Trailing-stop state machine for a single instrument.
///
/// Tracks the high-water mark since start, the stop price derived from it and
/// the current position. Owns at most one stop-loss trigger at a time; a new
/// high always cancels the previous trigger before anything else is armed.
///
/// Pure: balances come in as arguments and trade intents go out as values.
/// The async driver in `crates/engine` does the I/O.
#[derive(Debug)]
pub struct TrailingStop {
    drawdown: Decimal,
    high_water_mark: Decimal,
    stop_price: Decimal,
    position: Position,
    active_trigger: Option<StopTrigger>,
    next_trigger_id: u64,
}

impl TrailingStop {
    /// Start from the real holdings: `Long` iff the available base balance
    /// is strictly positive. No trigger is armed until the first high.
    pub fn new(drawdown: Decimal, base_available: Decimal) -> Result<Self> {
        if drawdown <= Decimal::ZERO || drawdown >= Decimal::ONE {
            return Err(Error::Config(format!(
                "drawdown must be strictly between 0 and 1, got {drawdown}"
            )));
        }
        let position = if base_available > Decimal::ZERO {
            Position::Long
        } else {
            Position::Flat
        };
        info!(%drawdown, %position, "Trailing stop initialized");

        Ok(Self {
            drawdown,
            high_water_mark: Decimal::ZERO,
            stop_price: Decimal::ZERO,
            position,
            active_trigger: None,
            next_trigger_id: 1,
        })
    }

    pub fn drawdown(&self) -> Decimal {
        self.drawdown
    }

    pub fn high_water_mark(&self) -> Decimal {
        self.high_water_mark
    }

    pub fn stop_price(&self) -> Decimal {
        self.stop_price
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn active_trigger(&self) -> Option<&StopTrigger> {
        self.active_trigger.as_ref()
    }

    /// Strictly above the high-water mark. Equal prices are not new highs.
    pub fn is_new_high(&self, price: Decimal) -> bool {
        price > self.high_water_mark
    }

    /// `high × (1 − drawdown)`.
    pub fn stop_for(&self, high: Decimal) -> Decimal {
        high * (Decimal::ONE - self.drawdown)
    }

    /// Check the armed stop against `tick`. On a fire the trigger is spent,
    /// the position goes `Flat` and nothing is re-armed.
    pub fn check_stop(&mut self, tick: &Tick) -> Option<StopLossFired> {
        let trigger = self.active_trigger.as_ref()?;
        let fired = trigger.try_fire(tick)?;
        let armed_at = trigger.armed_at();
        self.active_trigger = None;
        self.position = Position::Flat;
        info!(trigger = %fired.id, price = %fired.price, %armed_at, "Stop-loss fired");
        Some(fired)
    }

    /// True if `check_stop` would fire on `tick`. Lets the caller gather
    /// what the sell needs before anything is committed.
    pub fn stop_reached(&self, tick: &Tick) -> bool {
        self.active_trigger
            .as_ref()
            .is_some_and(|t| t.would_fire(tick))
    }

    /// Apply a new high with the balances fetched for it. Returns `None`
    /// (and changes nothing) if `price` is not above the high-water mark.
    ///
    /// Position moves optimistically: a `Buy` transition has already set
    /// `Long` before the order is placed, and an order failure does not
    /// roll it back.
    pub fn on_new_high(
        &mut self,
        price: Decimal,
        base_available: Decimal,
        quote_available: Decimal,
    ) -> Option<Transition> {
        if !self.is_new_high(price) {
            debug!(%price, high = %self.high_water_mark, "No new high");
            return None;
        }
        self.high_water_mark = price;
        self.stop_price = self.stop_for(price);
        info!(high = %self.high_water_mark, stop = %self.stop_price, "New high-water mark");

        let cancelled = self.cancel_active();

        match self.position {
            Position::Long => {
                let id = TriggerId(self.next_trigger_id);
                self.next_trigger_id += 1;
                let mut trigger = StopTrigger::new(id, self.stop_price, base_available);
                trigger.arm();
                info!(trigger = %id, stop = %self.stop_price, base = %base_available, "Stop-loss armed");
                self.active_trigger = Some(trigger);
                Some(Transition::Rearmed {
                    cancelled,
                    armed: id,
                    stop_price: self.stop_price,
                    base_balance: base_available,
                })
            }
            Position::Flat => {
                self.position = Position::Long;
                info!(%price, quote = %quote_available, "Buy signal on new high");
                Some(Transition::Buy {
                    cancelled,
                    intent: TradeIntent::buy_with_quote(quote_available),
                })
            }
        }
    }

    /// Cancel and drop the active trigger, if any.
    fn cancel_active(&mut self) -> Option<TriggerId> {
        let trigger = self.active_trigger.take()?;
        trigger.cancel();
        debug!(trigger = %trigger.id(), "Stop-loss cancelled");
        Some(trigger.id())
    }

    pub fn snapshot(&self, last_price: Option<Decimal>) -> StrategySnapshot {
        StrategySnapshot {
            position: self.position,
            high_water_mark: self.high_water_mark,
            stop_price: self.stop_price,
            active_trigger: self
                .active_trigger
                .as_ref()
                .filter(|t| t.is_armed())
                .map(StopTrigger::id),
            last_price,
        }
    }
}
