use async_trait::async_trait;
use tracing::info;

/// Out-of-band delivery of human-readable event messages.
///
/// Best effort: implementations swallow and log their own failures so a
/// broken channel never reaches the strategy.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log. Used when no push channel is configured.
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, title: &str, message: &str) {
        info!(target: "trade", title = %title, "{message}");
    }
}
