use async_trait::async_trait;
use teloxide::prelude::*;

use common::Notifier;

use crate::commands::send_alert;

/// Pushes strategy notifications to every allowed Telegram chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, user_ids: &[i64]) -> Self {
        Self {
            bot: Bot::new(token),
            chat_ids: user_ids.iter().map(|&id| ChatId(id)).collect(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, title: &str, message: &str) {
        send_alert(&self.bot, &self.chat_ids, &format!("{title}\n{message}")).await;
    }
}
