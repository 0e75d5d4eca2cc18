use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use common::{
    Balances, Error, ExchangeClient, Order, OrderResult, OrderSide, OrderSize, OrderStatus,
    Position, Result, StrategyEvent, Tick, TradingMode, TriggerId,
};
use engine::StrategyEngine;
use strategy::{SellSizing, TrailingConfig};

#[derive(Default)]
struct MockExchange {
    balances: Mutex<Balances>,
    orders: Mutex<Vec<Order>>,
    balance_calls: AtomicUsize,
    fail_balances: AtomicBool,
    fail_orders: AtomicBool,
}

impl MockExchange {
    fn holding(base: Decimal, quote: Decimal) -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(Balances::default().with("ETH", base).with("EUR", quote)),
            ..Default::default()
        })
    }

    fn set_balances(&self, base: Decimal, quote: Decimal) {
        *self.balances.lock().unwrap() = Balances::default().with("ETH", base).with("EUR", quote);
    }

    fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn balances(&self) -> Result<Balances> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_balances.load(Ordering::SeqCst) {
            return Err(Error::Http("connection reset".into()));
        }
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderResult> {
        self.orders.lock().unwrap().push(order.clone());
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(Error::Exchange("HTTP 400: rejected".into()));
        }
        let executed_qty = match order.size {
            OrderSize::Base(q) => q,
            OrderSize::Quote(q) => q / dec!(100),
        };
        Ok(OrderResult {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Filled,
            executed_qty,
            quote_qty: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }
}

fn config(sell_sizing: SellSizing) -> TrailingConfig {
    TrailingConfig {
        base: "ETH".into(),
        quote: "EUR".into(),
        max_drawdown: dec!(0.1),
        sell_sizing,
    }
}

async fn start(
    client: Arc<MockExchange>,
    sell_sizing: SellSizing,
) -> (StrategyEngine, mpsc::Receiver<StrategyEvent>) {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (engine, _handle) = StrategyEngine::start(&config(sell_sizing), client, TradingMode::Paper, event_tx)
        .await
        .unwrap();
    (engine, event_rx)
}

fn drain(rx: &mut mpsc::Receiver<StrategyEvent>) -> Vec<StrategyEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

async fn feed(engine: &mut StrategyEngine, prices: &[Decimal]) {
    for &p in prices {
        let _ = engine.on_tick(Tick::new(p)).await;
    }
}

#[tokio::test]
async fn start_places_no_orders_and_reports_position() {
    let client = MockExchange::holding(dec!(0), dec!(1000));
    let (engine, mut rx) = start(client.clone(), SellSizing::Armed).await;

    assert_eq!(engine.core().position(), Position::Flat);
    assert_eq!(engine.core().high_water_mark(), Decimal::ZERO);
    assert!(engine.core().active_trigger().is_none());
    assert!(client.orders().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![StrategyEvent::Started {
            position: Position::Flat
        }]
    );
}

#[tokio::test]
async fn scenario_a_flat_buys_on_first_high_then_ignores_lower_ticks() {
    let client = MockExchange::holding(dec!(0), dec!(1000));
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Armed).await;

    feed(&mut engine, &[dec!(100)]).await;
    let orders = client.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].size, OrderSize::Quote(dec!(1000)));
    assert_eq!(engine.core().position(), Position::Long);

    client.set_balances(dec!(10), dec!(0));
    drain(&mut rx);
    feed(&mut engine, &[dec!(105)]).await;
    assert_eq!(engine.core().high_water_mark(), dec!(105));
    assert_eq!(engine.core().stop_price(), dec!(94.5));

    let calls = client.balance_calls.load(Ordering::SeqCst);
    let before = engine.core().snapshot(None);
    drain(&mut rx);
    feed(&mut engine, &[dec!(103)]).await;
    assert_eq!(engine.core().snapshot(None), before);
    assert_eq!(client.balance_calls.load(Ordering::SeqCst), calls);
    assert_eq!(client.orders().len(), 1);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn scenario_b_long_sells_captured_balance_at_stop() {
    let client = MockExchange::holding(dec!(2.0), dec!(0));
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Armed).await;
    drain(&mut rx);

    feed(&mut engine, &[dec!(200)]).await;
    assert_eq!(engine.core().stop_price(), dec!(180));
    let trigger = engine.core().active_trigger().unwrap();
    assert_eq!(trigger.stop_price(), dec!(180));
    assert_eq!(trigger.base_balance(), dec!(2.0));

    feed(&mut engine, &[dec!(180)]).await;
    let orders = client.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].size, OrderSize::Base(dec!(2.0)));
    assert_eq!(engine.core().position(), Position::Flat);
    assert!(engine.core().active_trigger().is_none());

    let events = drain(&mut rx);
    assert!(events.contains(&StrategyEvent::TriggerFired {
        id: TriggerId(1),
        price: dec!(180)
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, StrategyEvent::OrderSubmitted { .. })));
}

#[tokio::test]
async fn scenario_c_second_high_replaces_trigger() {
    let client = MockExchange::holding(dec!(1), dec!(0));
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Armed).await;
    drain(&mut rx);

    feed(&mut engine, &[dec!(100)]).await;
    let first = engine.core().active_trigger().unwrap().handle();
    assert_eq!(
        drain(&mut rx),
        vec![
            StrategyEvent::NewHigh {
                high_water_mark: dec!(100),
                stop_price: dec!(90)
            },
            StrategyEvent::TriggerArmed {
                id: TriggerId(1),
                stop_price: dec!(90),
                base_balance: dec!(1)
            },
        ]
    );

    feed(&mut engine, &[dec!(110)]).await;
    let events = drain(&mut rx);
    let cancels = events
        .iter()
        .filter(|e| matches!(e, StrategyEvent::TriggerCancelled { .. }))
        .count();
    let arms: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StrategyEvent::TriggerArmed { id, stop_price, .. } => Some((*id, *stop_price)),
            _ => None,
        })
        .collect();
    assert_eq!(cancels, 1);
    assert!(events.contains(&StrategyEvent::TriggerCancelled { id: TriggerId(1) }));
    assert_eq!(arms, vec![(TriggerId(2), dec!(99))]);
    assert!(!events
        .iter()
        .any(|e| matches!(e, StrategyEvent::TriggerFired { .. })));
    assert!(!first.cancel(), "old trigger must already be cancelled");

    // Only the replacement stop can fire, and only once.
    feed(&mut engine, &[dec!(85), dec!(80)]).await;
    let fired: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            StrategyEvent::TriggerFired { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(fired, vec![TriggerId(2)]);
    assert_eq!(client.orders().len(), 1);
    assert_eq!(engine.core().position(), Position::Flat);
}

#[tokio::test]
async fn balance_failure_leaves_state_unchanged() {
    let client = MockExchange::holding(dec!(1), dec!(0));
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Armed).await;
    feed(&mut engine, &[dec!(100)]).await;
    let before = engine.core().snapshot(None);
    drain(&mut rx);

    client.fail_balances.store(true, Ordering::SeqCst);
    let err = engine.on_tick(Tick::new(dec!(120))).await.unwrap_err();
    assert!(matches!(err, Error::BalanceFetch(_)));
    assert_eq!(engine.core().snapshot(None), before);

    // The same price is still a new high once balances are back.
    client.fail_balances.store(false, Ordering::SeqCst);
    engine.on_tick(Tick::new(dec!(120))).await.unwrap();
    assert_eq!(engine.core().high_water_mark(), dec!(120));
    assert_eq!(engine.core().stop_price(), dec!(108));
}

#[tokio::test]
async fn failed_buy_keeps_optimistic_long() {
    let client = MockExchange::holding(dec!(0), dec!(500));
    client.fail_orders.store(true, Ordering::SeqCst);
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Armed).await;
    drain(&mut rx);

    let err = engine.on_tick(Tick::new(dec!(100))).await.unwrap_err();
    assert!(matches!(err, Error::Execution(_)));
    assert_eq!(engine.core().position(), Position::Long);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StrategyEvent::OrderFailed { .. })));
}

#[tokio::test]
async fn armed_sizing_ignores_balance_change_before_fire() {
    let client = MockExchange::holding(dec!(2), dec!(0));
    let (mut engine, _rx) = start(client.clone(), SellSizing::Armed).await;
    feed(&mut engine, &[dec!(200)]).await;

    client.set_balances(dec!(0.5), dec!(0));
    feed(&mut engine, &[dec!(170)]).await;
    assert_eq!(client.orders()[0].size, OrderSize::Base(dec!(2)));
}

#[tokio::test]
async fn fresh_sizing_refetches_balance_at_fire() {
    let client = MockExchange::holding(dec!(2), dec!(0));
    let (mut engine, _rx) = start(client.clone(), SellSizing::Fresh).await;
    feed(&mut engine, &[dec!(200)]).await;

    client.set_balances(dec!(0.5), dec!(0));
    feed(&mut engine, &[dec!(170)]).await;
    assert_eq!(client.orders()[0].size, OrderSize::Base(dec!(0.5)));
    assert_eq!(engine.core().position(), Position::Flat);
}

#[tokio::test]
async fn fresh_sizing_fetch_failure_keeps_stop_armed() {
    let client = MockExchange::holding(dec!(2), dec!(0));
    let (mut engine, mut rx) = start(client.clone(), SellSizing::Fresh).await;
    feed(&mut engine, &[dec!(200)]).await;
    let before = engine.core().snapshot(None);
    assert_eq!(before.active_trigger, Some(TriggerId(1)));
    drain(&mut rx);

    client.fail_balances.store(true, Ordering::SeqCst);
    let err = engine.on_tick(Tick::new(dec!(170))).await.unwrap_err();
    assert!(matches!(err, Error::BalanceFetch(_)));
    assert_eq!(engine.core().snapshot(None), before);
    assert!(engine.core().active_trigger().unwrap().is_armed());
    assert!(client.orders().is_empty());
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, StrategyEvent::TriggerFired { .. })));

    // The next tick at or below the stop sells once balances are back.
    client.fail_balances.store(false, Ordering::SeqCst);
    engine.on_tick(Tick::new(dec!(160))).await.unwrap();
    let orders = client.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].size, OrderSize::Base(dec!(2)));
    assert_eq!(engine.core().position(), Position::Flat);
    assert!(engine.core().active_trigger().is_none());
}

#[tokio::test]
async fn full_cycle_alternates_buy_and_sell() {
    let client = MockExchange::holding(dec!(0), dec!(1000));
    let (mut engine, _rx) = start(client.clone(), SellSizing::Armed).await;

    feed(&mut engine, &[dec!(100)]).await; // buy
    client.set_balances(dec!(10), dec!(0));
    feed(&mut engine, &[dec!(110), dec!(98)]).await; // arm at 99, fire
    client.set_balances(dec!(0), dec!(980));
    feed(&mut engine, &[dec!(105), dec!(111)]).await; // 111 is a new high -> buy

    let sides: Vec<_> = client.orders().iter().map(|o| o.side).collect();
    assert_eq!(sides, vec![OrderSide::Buy, OrderSide::Sell, OrderSide::Buy]);
    assert_eq!(engine.core().position(), Position::Long);
}

#[tokio::test]
async fn full_event_channel_does_not_block_ticks() {
    let client = MockExchange::holding(dec!(1), dec!(0));
    let (event_tx, _event_rx) = mpsc::channel(1);
    let (mut engine, _handle) =
        StrategyEngine::start(&config(SellSizing::Armed), client, TradingMode::Paper, event_tx)
            .await
            .unwrap();

    for p in 1..50 {
        engine.on_tick(Tick::new(Decimal::from(p))).await.unwrap();
    }
    assert_eq!(engine.core().high_water_mark(), dec!(49));
}

#[tokio::test]
async fn run_processes_queue_then_reports_feed_loss() {
    let client = MockExchange::holding(dec!(2), dec!(0));
    let (event_tx, _event_rx) = mpsc::channel(64);
    let (engine, handle) =
        StrategyEngine::start(&config(SellSizing::Armed), client.clone(), TradingMode::Paper, event_tx)
            .await
            .unwrap();

    let (tick_tx, tick_rx) = mpsc::channel(16);
    for p in [dec!(200), dec!(210), dec!(150)] {
        tick_tx.send(Tick::new(p)).await.unwrap();
    }
    drop(tick_tx);

    let err = engine.run(tick_rx).await.unwrap_err();
    assert!(err.is_fatal());

    let snapshot = handle.snapshot().await;
    assert_eq!(snapshot.position, Position::Flat);
    assert_eq!(snapshot.high_water_mark, dec!(210));
    assert_eq!(snapshot.last_price, Some(dec!(150)));
    assert_eq!(snapshot.active_trigger, None);
    assert_eq!(client.orders().len(), 1);
}

#[tokio::test]
async fn start_fails_when_balances_unavailable() {
    let client = MockExchange::holding(dec!(1), dec!(0));
    client.fail_balances.store(true, Ordering::SeqCst);
    let (event_tx, _rx) = mpsc::channel(8);
    let res = StrategyEngine::start(&config(SellSizing::Armed), client, TradingMode::Paper, event_tx).await;
    assert!(matches!(res, Err(Error::BalanceFetch(_))));
}
