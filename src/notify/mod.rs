// Outbound notifications: message formatting, the paced delivery queue and
// the Telegram sink plus its reply feed.

pub mod message;
pub mod queue;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::collaborators::NotificationSink;

pub use message::{escape_clipped, escape_html, SignalNotification, MAX_MESSAGE_CHARS};
pub use queue::{NotificationQueue, QueueStats};
pub use telegram::{TelegramSink, TelegramUpdates};

/// Writes messages to the log instead of a chat. Used when no bot token is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) -> Result<()> {
        info!(target: "notification", "{message}");
        Ok(())
    }
}
