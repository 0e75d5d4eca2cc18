use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use common::{Tick, TriggerId};

const UNARMED: u8 = 0;
const ARMED: u8 = 1;
const FIRED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle of a one-shot trigger: `Unarmed -> Armed -> {Fired, Cancelled}`.
/// Both `Fired` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Unarmed,
    Armed,
    Fired,
    Cancelled,
}

impl TriggerState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            UNARMED => TriggerState::Unarmed,
            ARMED => TriggerState::Armed,
            FIRED => TriggerState::Fired,
            _ => TriggerState::Cancelled,
        }
    }
}

/// Outcome of a stop-loss trigger firing. Carries the base balance captured
/// when the trigger was armed, which is what the sell is sized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopLossFired {
    pub id: TriggerId,
    pub price: Decimal,
    pub base_balance: Decimal,
}

/// A price-crossing watch: fires when a tick falls to or below `stop_price`.
///
/// The state lives in a shared atomic so a `TriggerHandle` held elsewhere can
/// cancel it. Every transition out of `Armed` is a compare-and-swap, so when
/// `cancel` and `try_fire` race exactly one of them wins and the fire action
/// runs at most once.
#[derive(Debug)]
pub struct StopTrigger {
    id: TriggerId,
    stop_price: Decimal,
    base_balance: Decimal,
    armed_at: DateTime<Utc>,
    state: Arc<AtomicU8>,
}

impl StopTrigger {
    /// Create an unarmed trigger with the balance snapshot it will sell.
    pub fn new(id: TriggerId, stop_price: Decimal, base_balance: Decimal) -> Self {
        Self {
            id,
            stop_price,
            base_balance,
            armed_at: Utc::now(),
            state: Arc::new(AtomicU8::new(UNARMED)),
        }
    }

    /// `Unarmed -> Armed`. Returns false if the trigger was already used.
    pub fn arm(&mut self) -> bool {
        let armed = self.transition(UNARMED, ARMED);
        if armed {
            self.armed_at = Utc::now();
        }
        armed
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn stop_price(&self) -> Decimal {
        self.stop_price
    }

    /// Base-asset balance captured at arm time.
    pub fn base_balance(&self) -> Decimal {
        self.base_balance
    }

    pub fn armed_at(&self) -> DateTime<Utc> {
        self.armed_at
    }

    pub fn state(&self) -> TriggerState {
        TriggerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_armed(&self) -> bool {
        self.state() == TriggerState::Armed
    }

    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            id: self.id,
            state: self.state.clone(),
        }
    }

    /// Whether `tick` would fire this trigger right now. Changes nothing.
    pub fn would_fire(&self, tick: &Tick) -> bool {
        self.is_armed() && tick.price <= self.stop_price
    }

    /// Fire if armed and `tick` is at or below the stop. Succeeds at most once.
    pub fn try_fire(&self, tick: &Tick) -> Option<StopLossFired> {
        if tick.price > self.stop_price {
            return None;
        }
        self.transition(ARMED, FIRED).then_some(StopLossFired {
            id: self.id,
            price: tick.price,
            base_balance: self.base_balance,
        })
    }

    /// `Armed -> Cancelled`. Idempotent; returns true only for the call that
    /// actually cancelled.
    pub fn cancel(&self) -> bool {
        self.handle().cancel()
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable cancel handle for an armed trigger.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    id: TriggerId,
    state: Arc<AtomicU8>,
}

impl TriggerHandle {
    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn state(&self) -> TriggerState {
        TriggerState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Cancelling a fired, cancelled or never-armed trigger is a no-op.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
