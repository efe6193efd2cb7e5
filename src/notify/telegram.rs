// =============================================================================
// Telegram — Bot API sendMessage (HTML parse mode) and getUpdates long poll
// =============================================================================
//
// Messages arrive here already sized and escaped (see `message.rs`); the
// sink never cuts them, since a cut could land inside a tag or an entity.
//
// SECURITY: the bot token is part of the request path; it is never logged
// and is redacted from Debug output.
// =============================================================================

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::collaborators::{ChatUpdate, NotificationSink, UpdateSource};

const API_BASE: &str = "https://api.telegram.org";

/// Check the Bot API envelope (`{"ok": bool, "description": ..}`).
fn ensure_ok(method: &str, status: reqwest::StatusCode, body: &Value) -> Result<()> {
    if !status.is_success() || body["ok"].as_bool() != Some(true) {
        bail!(
            "Telegram {} returned {}: {}",
            method,
            status,
            body["description"].as_str().unwrap_or("no description")
        );
    }
    Ok(())
}

// =============================================================================
// Sink
// =============================================================================

#[derive(Clone)]
pub struct TelegramSink {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Telegram http client")?;
        Ok(Self {
            token: token.into(),
            chat_id: chat_id.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    #[instrument(skip(self, message), name = "telegram::send", fields(chars = message.len()))]
    async fn send(&self, message: &str) -> Result<()> {
        let url = format!("{API_BASE}/bot{}/sendMessage", self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST sendMessage request failed")?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("failed to parse sendMessage response")?;
        ensure_ok("sendMessage", status, &body)?;

        debug!("telegram message sent");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("chat_id", &self.chat_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Update feed
// =============================================================================

/// `getUpdates` long-poll client for chat replies.
#[derive(Clone)]
pub struct TelegramUpdates {
    token: String,
    poll_secs: u64,
    client: reqwest::Client,
}

impl TelegramUpdates {
    /// `poll` is the server-side long-poll window; the HTTP timeout is
    /// `poll + slack` so an idle poll never trips it.
    pub fn new(token: impl Into<String>, poll: Duration, slack: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(poll + slack)
            .build()
            .context("failed to build Telegram updates http client")?;
        Ok(Self {
            token: token.into(),
            poll_secs: poll.as_secs(),
            client,
        })
    }
}

/// Pull `ChatUpdate`s out of a getUpdates `result` array. Entries without
/// an `update_id` are dropped.
pub fn parse_updates(body: &Value) -> Vec<ChatUpdate> {
    let Some(entries) = body["result"].as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let update_id = entry["update_id"].as_i64()?;
            let message = &entry["message"];
            let chat_id = match &message["chat"]["id"] {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            };
            let text = message["text"]
                .as_str()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Some(ChatUpdate {
                update_id,
                chat_id,
                text,
            })
        })
        .collect()
}

#[async_trait]
impl UpdateSource for TelegramUpdates {
    #[instrument(skip(self), name = "telegram::get_updates")]
    async fn updates(&self, offset: i64) -> Result<Vec<ChatUpdate>> {
        let url = format!("{API_BASE}/bot{}/getUpdates", self.token);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_secs.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .context("GET getUpdates request failed")?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("failed to parse getUpdates response")?;
        ensure_ok("getUpdates", status, &body)?;

        let updates = parse_updates(&body);
        debug!(count = updates.len(), "telegram updates received");
        Ok(updates)
    }
}

impl std::fmt::Debug for TelegramUpdates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramUpdates")
            .field("poll_secs", &self.poll_secs)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let sink = TelegramSink::new("123:secret", "42", Duration::from_secs(1)).unwrap();
        assert!(!format!("{sink:?}").contains("secret"));

        let updates =
            TelegramUpdates::new("123:secret", Duration::from_secs(30), Duration::from_secs(5))
                .unwrap();
        assert!(!format!("{updates:?}").contains("secret"));
    }

    #[test]
    fn parse_updates_keeps_ids_of_textless_entries() {
        let body = json!({
            "ok": true,
            "result": [
                { "update_id": 10, "message": { "chat": { "id": -1001 }, "text": "  why skip?  " } },
                { "update_id": 11, "message": { "chat": { "id": -1001 }, "sticker": {} } },
                { "update_id": 12, "edited_message": { "text": "ignored" } },
                { "message": { "text": "no id" } }
            ]
        });
        let updates = parse_updates(&body);
        assert_eq!(updates.len(), 3);
        assert_eq!(
            updates[0],
            ChatUpdate {
                update_id: 10,
                chat_id: Some("-1001".into()),
                text: Some("why skip?".into()),
            }
        );
        assert_eq!(updates[1].text, None);
        assert_eq!(updates[2].chat_id, None);
    }

    #[test]
    fn envelope_errors_carry_description() {
        let body = json!({ "ok": false, "description": "Unauthorized" });
        let err = ensure_ok("getUpdates", reqwest::StatusCode::UNAUTHORIZED, &body).unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
        assert!(ensure_ok("sendMessage", reqwest::StatusCode::OK, &json!({ "ok": true })).is_ok());
    }
}
