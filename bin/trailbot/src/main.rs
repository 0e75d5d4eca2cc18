use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Config, ConsoleNotifier, Error, ExchangeClient, Notifier, StrategyEvent, Tick, TradingMode,
};
use engine::{BinanceClient, BinanceStream, EngineHandle, StrategyEngine};
use paper::PaperClient;
use strategy::{StrategyFileConfig, TrailingConfig};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let trailing = StrategyFileConfig::load(&cfg.strategy_config_path)?.strategy;
    let instrument = trailing.instrument();
    info!(
        mode = %cfg.trading_mode,
        pair = %instrument,
        max_drawdown = %trailing.max_drawdown,
        "TrailBot starting"
    );

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    let mut paper_client: Option<Arc<PaperClient>> = None;
    let exchange: Arc<dyn ExchangeClient> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode, orders go to Binance");
            Arc::new(BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret)?)
        }
        TradingMode::Paper => {
            info!(slippage_bps = %cfg.paper_slippage_bps, "Paper trading mode, orders are simulated");
            let paper = Arc::new(PaperClient::new(
                instrument.clone(),
                cfg.paper_base_balance,
                cfg.paper_quote_balance,
                cfg.paper_slippage_bps,
            ));
            paper_client = Some(paper.clone());
            paper
        }
    };

    // ── Notifier ──────────────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match &cfg.telegram {
        Some(tg) => Arc::new(TelegramNotifier::new(&tg.token, &tg.allowed_user_ids)),
        None => {
            info!("TELEGRAM_TOKEN not set, notifications go to the log");
            Arc::new(ConsoleNotifier)
        }
    };

    // ── Channels ──────────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<StrategyEvent>(256);
    let (feed_tx, mut feed_rx) = mpsc::channel::<Tick>(1024);
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(1024);

    // ── Strategy engine ───────────────────────────────────────────────────────
    let (engine, engine_handle) =
        start_engine(&trailing, exchange, cfg.trading_mode, event_tx, notifier.as_ref()).await?;

    // ── Event forwarder (sends notable events to the notifier) ────────────────
    {
        let notifier = notifier.clone();
        let instrument = instrument.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if event.is_notable() {
                    let (title, message) = event.describe(&instrument);
                    notifier.notify(&title, &message).await;
                }
            }
        });
    }

    // ── Tick forwarder (keeps the paper exchange priced) ──────────────────────
    tokio::spawn(async move {
        while let Some(tick) = feed_rx.recv().await {
            if let Some(paper) = &paper_client {
                paper.update_price(tick.price).await;
            }
            if tick_tx.send(tick).await.is_err() {
                warn!("Engine tick channel closed");
                break;
            }
        }
    });

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    if let Some(tg) = &cfg.telegram {
        let deps = BotDeps {
            engine: engine_handle.clone(),
            trading_mode: cfg.trading_mode,
            allowed_user_ids: Arc::new(tg.allowed_user_ids.clone()),
        };
        tokio::spawn(start_bot(tg.token.clone(), deps));
    }

    // ── Spawn feed and engine ─────────────────────────────────────────────────
    let feed = tokio::spawn(BinanceStream::new(instrument.clone(), feed_tx).run());
    let engine_task = tokio::spawn(engine.run(tick_rx));

    info!("All subsystems started. Waiting for shutdown signal.");
    let outcome: Result<(), Error> = tokio::select! {
        res = feed => res.map_err(|e| Error::Feed(e.to_string())).and_then(|r| r),
        res = engine_task => res.map_err(|e| Error::Feed(e.to_string())).and_then(|r| r),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting.");
            return Ok(());
        }
    };

    if let Err(e) = outcome {
        error!(error = %e, "Price feed lost, stopping");
        notifier.notify("Feed lost", &format!("{instrument}: {e}")).await;
        return Err(e.into());
    }
    Ok(())
}

/// Start the engine, telling the operator if it cannot.
async fn start_engine(
    trailing: &TrailingConfig,
    exchange: Arc<dyn ExchangeClient>,
    mode: TradingMode,
    event_tx: mpsc::Sender<StrategyEvent>,
    notifier: &dyn Notifier,
) -> Result<(StrategyEngine, EngineHandle), Error> {
    match StrategyEngine::start(trailing, exchange, mode, event_tx).await {
        Ok(started) => Ok(started),
        Err(e) => {
            error!(error = %e, "Strategy engine failed to start");
            notifier
                .notify("Startup failed", &format!("{}: {e}", trailing.instrument()))
                .await;
            Err(e)
        }
    }
}
