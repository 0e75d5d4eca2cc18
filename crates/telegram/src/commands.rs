use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{Instrument, StrategySnapshot, TradingMode};
use engine::EngineHandle;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: EngineHandle,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator. Read-only: the strategy
/// is never steered from chat.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "TrailBot commands:")]
pub enum Command {
    #[command(description = "Show position, high-water mark and stop price")]
    Status,
    #[command(description = "Show this help")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let snapshot = deps.engine.snapshot().await;
    let text = format_status(deps.engine.instrument(), deps.trading_mode, &snapshot);
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub fn format_status(
    instrument: &Instrument,
    mode: TradingMode,
    snapshot: &StrategySnapshot,
) -> String {
    let quote = &instrument.quote;
    let last = snapshot
        .last_price
        .map(|p| format!("{p} {quote}"))
        .unwrap_or_else(|| "no ticks yet".to_string());
    let stop = match snapshot.active_trigger {
        Some(id) => format!("{} {quote} (armed {id})", snapshot.stop_price),
        None => "not armed".to_string(),
    };
    format!(
        "TrailBot Status\n\
         Pair: {instrument}\n\
         Mode: {mode}\n\
         Position: {}\n\
         Last price: {last}\n\
         High: {} {quote}\n\
         Stop: {stop}",
        snapshot.position, snapshot.high_water_mark
    )
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}
