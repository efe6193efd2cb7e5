// =============================================================================
// Follow-up Desk — answers chat replies about the latest signal
// =============================================================================
//
// Polls the chat's update feed and, for every text message from the
// configured chat, asks the responder about the newest entry in
// RecentSignals. Replies go through the notification queue so they share
// its pacing with signal messages.
//
//   - Silent until the first signal has been processed (offsets still
//     advance, so earlier chatter is never answered later).
//   - Messages from other chats are ignored.
//   - A responder failure or timeout sends a short retry hint instead.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::collaborators::{ChatUpdate, FollowUpResponder, UpdateSource};
use crate::notify::{escape_clipped, NotificationQueue, MAX_MESSAGE_CHARS};
use crate::pipeline::RecentSignals;

pub const REPLY_HEADER: &str = "<b>Analyst reply:</b>\n";
pub const REPLY_FALLBACK: &str = "Thinking... try again.";

pub struct FollowUpDesk {
    updates: Arc<dyn UpdateSource>,
    responder: Arc<dyn FollowUpResponder>,
    recent: Arc<RecentSignals>,
    queue: Arc<NotificationQueue>,
    /// Only messages from this chat are answered.
    chat_id: String,
    answer_timeout: Duration,
    offset: i64,
}

impl FollowUpDesk {
    pub fn new(
        updates: Arc<dyn UpdateSource>,
        responder: Arc<dyn FollowUpResponder>,
        recent: Arc<RecentSignals>,
        queue: Arc<NotificationQueue>,
        chat_id: impl Into<String>,
        answer_timeout: Duration,
    ) -> Self {
        Self {
            updates,
            responder,
            recent,
            queue,
            chat_id: chat_id.into(),
            answer_timeout,
            offset: 0,
        }
    }

    /// Next update id the feed will be asked for.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Fetch one batch of updates and answer what qualifies. Returns the
    /// number of replies queued.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let batch = self.updates.updates(self.offset).await?;
        let mut replies = 0;

        for update in batch {
            self.offset = self.offset.max(update.update_id + 1);
            if let Some(reply) = self.reply_to(&update).await? {
                let _handle = self.queue.enqueue(reply);
                replies += 1;
            }
        }

        Ok(replies)
    }

    async fn reply_to(&self, update: &ChatUpdate) -> Result<Option<String>> {
        let Some(question) = update.text.as_deref() else {
            return Ok(None);
        };
        if update.chat_id.as_deref() != Some(self.chat_id.as_str()) {
            debug!(update_id = update.update_id, chat_id = ?update.chat_id, "reply from another chat, ignoring");
            return Ok(None);
        }
        let Some(latest) = self.recent.latest() else {
            debug!(update_id = update.update_id, "no signal processed yet, ignoring reply");
            return Ok(None);
        };

        let context = serde_json::to_string_pretty(&latest)
            .context("failed to render signal context")?;

        let answer = tokio::time::timeout(
            self.answer_timeout,
            self.responder.answer(question, &context),
        )
        .await;

        let reply = match answer {
            Ok(Ok(text)) => {
                info!(update_id = update.update_id, signal_id = %latest.signal.id, "follow-up answered");
                let budget = MAX_MESSAGE_CHARS - REPLY_HEADER.chars().count();
                format!("{REPLY_HEADER}{}", escape_clipped(text.trim(), budget))
            }
            Ok(Err(e)) => {
                warn!(update_id = update.update_id, error = %e, "follow-up responder failed");
                REPLY_FALLBACK.to_string()
            }
            Err(_) => {
                warn!(update_id = update.update_id, "follow-up responder timed out");
                REPLY_FALLBACK.to_string()
            }
        };
        Ok(Some(reply))
    }

    /// Poll forever, pausing `idle` between polls. Errors are logged and
    /// the loop keeps going.
    pub async fn run(mut self, idle: Duration) {
        info!(chat_id = %self.chat_id, "follow-up desk polling for replies");
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!(replies = n, offset = self.offset, "follow-up replies queued"),
                Err(e) => warn!(error = %e, offset = self.offset, "follow-up poll failed"),
            }
            tokio::time::sleep(idle).await;
        }
    }
}

impl std::fmt::Debug for FollowUpDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FollowUpDesk")
            .field("chat_id", &self.chat_id)
            .field("offset", &self.offset)
            .finish()
    }
}
