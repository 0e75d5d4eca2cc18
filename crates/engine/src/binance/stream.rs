use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Error, Instrument, Result, Tick};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Binance ticker WebSocket stream for a single pair.
///
/// Connects to the per-symbol `@ticker` stream, turns each update into a
/// `Tick` (last price) and pushes it to the engine in arrival order.
/// Reconnects are governed by `ReconnectPolicy`.
pub struct BinanceStream {
    instrument: Instrument,
    tick_tx: mpsc::Sender<Tick>,
    max_reconnects: u32,
}

impl BinanceStream {
    pub fn new(instrument: Instrument, tick_tx: mpsc::Sender<Tick>) -> Self {
        Self {
            instrument,
            tick_tx,
            max_reconnects: 5,
        }
    }

    /// Run until the feed is lost for good. Only ever returns `Error::Feed`.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) -> Result<()> {
        let mut policy = ReconnectPolicy::new(self.max_reconnects);

        loop {
            info!(pair = %self.instrument, "Connecting to Binance WebSocket stream");
            let mut session = Session::default();
            let outcome = self.connect_once(&mut session).await;
            session.engine_gone |= self.tick_tx.is_closed();

            if let Err(e) = &outcome {
                warn!(pair = %self.instrument, error = %e, ticks = session.ticks, "WebSocket session ended");
            } else {
                info!(pair = %self.instrument, ticks = session.ticks, "WebSocket stream closed cleanly");
            }
            let delay = policy.after_session(&self.instrument, session, outcome)?;
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(&self, session: &mut Session) -> Result<()> {
        let url_str = format!(
            "wss://stream.binance.com:9443/ws/{}@ticker",
            self.instrument.symbol().to_lowercase()
        );
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        session.connected = true;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_ticker_event(&text) {
                    Ok(Some(tick)) => {
                        if self.tick_tx.send(tick).await.is_err() {
                            session.engine_gone = true;
                            return Ok(());
                        }
                        session.ticks += 1;
                    }
                    Ok(None) => {} // not a ticker update, skip
                    Err(e) => {
                        warn!(error = %e, "Failed to parse ticker event");
                    }
                }
            }
        }

        Ok(())
    }
}

/// What one connection attempt achieved before it ended.
#[derive(Debug, Default, Clone, Copy)]
struct Session {
    connected: bool,
    ticks: u64,
    engine_gone: bool,
}

/// Decides whether, and after how long, to reconnect.
///
/// - Failing the very first subscription is fatal.
/// - Later failures retry with exponential backoff, up to `max_reconnects`
///   consecutive failures.
/// - A session that delivered ticks, or closed cleanly, resets the count.
/// - An engine that stopped consuming ticks ends the feed.
#[derive(Debug)]
struct ReconnectPolicy {
    max_reconnects: u32,
    failures: u32,
    backoff: Duration,
    ever_connected: bool,
}

impl ReconnectPolicy {
    fn new(max_reconnects: u32) -> Self {
        Self {
            max_reconnects,
            failures: 0,
            backoff: MIN_BACKOFF,
            ever_connected: false,
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.backoff = MIN_BACKOFF;
    }

    /// Delay before the next attempt, or the fatal feed error.
    fn after_session(
        &mut self,
        instrument: &Instrument,
        session: Session,
        outcome: Result<()>,
    ) -> Result<Duration> {
        if session.engine_gone {
            return Err(Error::Feed("engine stopped consuming ticks".into()));
        }
        self.ever_connected |= session.connected;
        if session.ticks > 0 {
            self.reset();
        }

        match outcome {
            Ok(()) => {
                self.reset();
                Ok(self.backoff)
            }
            Err(e) if !self.ever_connected => Err(Error::Feed(format!(
                "subscription to {instrument} failed: {e}"
            ))),
            Err(e) => {
                self.failures += 1;
                if self.failures > self.max_reconnects {
                    return Err(Error::Feed(format!(
                        "gave up after {} reconnects: {e}",
                        self.max_reconnects
                    )));
                }
                let delay = self.backoff;
                self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                Ok(delay)
            }
        }
    }
}

// ─── Binance ticker JSON parsing ─────────────────────────────────────────────

#[derive(Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "c")]
    last_price: Decimal,
}

fn parse_ticker_event(text: &str) -> Result<Option<Tick>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|v| v.as_str()) != Some("24hrTicker") {
        return Ok(None);
    }

    let event: TickerEvent = serde_json::from_value(value)?;
    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.event_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(Tick {
        price: event.last_price,
        timestamp,
    }))
}
