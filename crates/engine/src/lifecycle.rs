use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use common::{
    Error, ExchangeClient, Instrument, Result, StrategyEvent, StrategySnapshot, Tick,
    TradeIntent, TradingMode,
};
use strategy::{SellSizing, TrailingConfig, TrailingStop, Transition};

use crate::executor::OrderExecutor;

/// Cloneable read-only handle passed to other crates (Telegram).
#[derive(Clone)]
pub struct EngineHandle {
    instrument: Instrument,
    snapshot: Arc<RwLock<StrategySnapshot>>,
}

impl EngineHandle {
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub async fn snapshot(&self) -> StrategySnapshot {
        self.snapshot.read().await.clone()
    }
}

/// Drives the trailing stop from the tick feed.
///
/// Sole owner of the strategy state. Ticks are handled strictly one at a
/// time: `run` awaits each tick's balance fetch and order submission before
/// taking the next one, so no two decisions ever see the same stale high or
/// position. Ticks arriving meanwhile queue in the feed channel.
pub struct StrategyEngine {
    instrument: Instrument,
    core: TrailingStop,
    sell_sizing: SellSizing,
    client: Arc<dyn ExchangeClient>,
    executor: OrderExecutor,
    event_tx: mpsc::Sender<StrategyEvent>,
    snapshot: Arc<RwLock<StrategySnapshot>>,
    last_price: Option<Decimal>,
}

impl StrategyEngine {
    /// Read the current holdings and build the engine. Places no orders.
    pub async fn start(
        cfg: &TrailingConfig,
        client: Arc<dyn ExchangeClient>,
        mode: TradingMode,
        event_tx: mpsc::Sender<StrategyEvent>,
    ) -> Result<(Self, EngineHandle)> {
        let instrument = cfg.instrument();
        let balances = client.balances().await.map_err(balance_error)?;
        let base_available = balances.available(&instrument.base);
        let core = TrailingStop::new(cfg.max_drawdown, base_available)?;
        info!(
            pair = %instrument,
            base = %base_available,
            max_drawdown = %core.drawdown(),
            position = %core.position(),
            sell_sizing = ?cfg.sell_sizing,
            "Strategy engine started"
        );

        let snapshot = Arc::new(RwLock::new(core.snapshot(None)));
        let handle = EngineHandle {
            instrument: instrument.clone(),
            snapshot: snapshot.clone(),
        };
        let engine = StrategyEngine {
            executor: OrderExecutor::new(client.clone(), instrument.clone(), mode),
            instrument,
            sell_sizing: cfg.sell_sizing,
            client,
            event_tx,
            snapshot,
            last_price: None,
            core,
        };
        engine.emit(StrategyEvent::Started {
            position: engine.core.position(),
        });

        Ok((engine, handle))
    }

    pub fn core(&self) -> &TrailingStop {
        &self.core
    }

    /// Consume ticks until the feed closes. Per-tick errors are reported and
    /// the loop carries on; a closed feed is the only way out.
    pub async fn run(mut self, mut tick_rx: mpsc::Receiver<Tick>) -> Result<()> {
        info!(pair = %self.instrument, "Strategy engine consuming ticks");
        while let Some(tick) = tick_rx.recv().await {
            if let Err(e) = self.on_tick(tick).await {
                error!(pair = %self.instrument, error = %e, "Tick handling failed");
                // Order failures were already reported as OrderFailed.
                if !matches!(e, Error::Execution(_)) {
                    self.emit(StrategyEvent::Error {
                        error: e.to_string(),
                    });
                }
            }
        }
        warn!(pair = %self.instrument, "Tick channel closed");
        Err(Error::Feed("tick channel closed".into()))
    }

    /// Handle one tick: stop-loss check first, then the new-high path.
    pub async fn on_tick(&mut self, tick: Tick) -> Result<()> {
        debug!(price = %tick.price, "tick");
        self.last_price = Some(tick.price);
        let result = self.process(tick).await;
        *self.snapshot.write().await = self.core.snapshot(self.last_price);
        result
    }

    async fn process(&mut self, tick: Tick) -> Result<()> {
        if self.core.stop_reached(&tick) {
            return self.on_stop_reached(tick).await;
        }
        if !self.core.is_new_high(tick.price) {
            return Ok(());
        }

        // Nothing is committed until balances are in hand, so a failed fetch
        // leaves the state as it was.
        let balances = self.client.balances().await.map_err(balance_error)?;
        let base = balances.available(&self.instrument.base);
        let quote = balances.available(&self.instrument.quote);

        let Some(transition) = self.core.on_new_high(tick.price, base, quote) else {
            return Ok(());
        };
        self.emit(StrategyEvent::NewHigh {
            high_water_mark: self.core.high_water_mark(),
            stop_price: self.core.stop_price(),
        });
        if let Some(id) = transition.cancelled() {
            self.emit(StrategyEvent::TriggerCancelled { id });
        }

        match transition {
            Transition::Rearmed {
                armed,
                stop_price,
                base_balance,
                ..
            } => {
                self.emit(StrategyEvent::TriggerArmed {
                    id: armed,
                    stop_price,
                    base_balance,
                });
                Ok(())
            }
            Transition::Buy { intent, .. } => {
                self.emit(StrategyEvent::BuySignal { price: tick.price });
                self.submit(intent).await
            }
        }
    }

    /// Size the sell per `sell_sizing`, then fire. With `Fresh` sizing the
    /// balance is fetched before the trigger is consumed, so a failed fetch
    /// leaves the stop armed and the position long for the next tick.
    async fn on_stop_reached(&mut self, tick: Tick) -> Result<()> {
        let fresh_base = match self.sell_sizing {
            SellSizing::Armed => None,
            SellSizing::Fresh => Some(
                self.client
                    .balances()
                    .await
                    .map_err(balance_error)?
                    .available(&self.instrument.base),
            ),
        };
        let Some(fired) = self.core.check_stop(&tick) else {
            return Ok(());
        };
        self.emit(StrategyEvent::TriggerFired {
            id: fired.id,
            price: fired.price,
        });

        let base = fresh_base.unwrap_or(fired.base_balance);
        if base != fired.base_balance {
            info!(armed = %fired.base_balance, fresh = %base, "Base balance changed since stop was armed");
        }
        self.submit(TradeIntent::sell_base(base)).await
    }

    async fn submit(&self, intent: TradeIntent) -> Result<()> {
        match self.executor.execute(&intent).await {
            Ok(result) => {
                self.emit(StrategyEvent::OrderSubmitted { intent, result });
                Ok(())
            }
            Err(e) => {
                self.emit(StrategyEvent::OrderFailed {
                    intent,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Never blocks: a full or closed event channel drops the event.
    fn emit(&self, event: StrategyEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "Strategy event dropped");
        }
    }
}

fn balance_error(e: Error) -> Error {
    match e {
        Error::BalanceFetch(_) => e,
        other => Error::BalanceFetch(other.to_string()),
    }
}
