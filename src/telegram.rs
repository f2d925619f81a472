//! Telegram Bot API client: outbound send/edit and inbound long polling.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{TelegramConfig, POLL_RESTART_DELAY_SECS, POLL_TIMEOUT_SECS};
use crate::error::TransportError;
use crate::metrics::Metrics;
use crate::retry::{retry_async, RetryPolicy};
use crate::transport::Transport;
use crate::types::{DestinationId, MessageHandle};

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub channel_post: Option<Message>,
    pub edited_channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
}

impl Message {
    fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

// =============================================================================
// ROUTING
// =============================================================================

/// What an update means to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A post (or edit of a post) in the source channel.
    FeedPost { text: String, is_edit: bool },
    /// A `/command` sent in a private chat.
    Command {
        chat_id: i64,
        sender_id: i64,
        text: String,
    },
}

/// Classify an update. Posts from other channels, group chatter and non-command
/// private messages are dropped.
pub fn route_update(update: &Update, source_channel: i64) -> Option<Inbound> {
    let feed = |msg: &Message, is_edit: bool| {
        if msg.chat.id != source_channel {
            return None;
        }
        msg.body().map(|text| Inbound::FeedPost {
            text: text.to_string(),
            is_edit,
        })
    };

    if let Some(msg) = &update.channel_post {
        return feed(msg, false);
    }
    if let Some(msg) = &update.edited_channel_post {
        return feed(msg, true);
    }
    let msg = update.message.as_ref()?;
    if msg.chat.kind != "private" {
        return None;
    }
    let text = msg.text.as_deref()?.trim();
    if !text.starts_with('/') {
        return None;
    }
    Some(Inbound::Command {
        chat_id: msg.chat.id,
        sender_id: msg.from.as_ref().map(|u| u.id).unwrap_or(msg.chat.id),
        text: text.to_string(),
    })
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let parsed: ApiResponse<T> = resp.json().await.map_err(|e| {
            TransportError::Malformed(format!("{} returned HTTP {}: {}", method, status, e))
        })?;

        if !parsed.ok {
            return Err(TransportError::Api {
                code: parsed.error_code.unwrap_or(status.as_u16()),
                description: parsed.description.unwrap_or_default(),
                retry_after_secs: parsed.parameters.and_then(|p| p.retry_after),
            });
        }
        parsed
            .result
            .ok_or_else(|| TransportError::Malformed(format!("{} returned no result", method)))
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.fetch_updates(offset, POLL_TIMEOUT_SECS).await
    }

    async fn fetch_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout,
                "allowed_updates": ["message", "channel_post", "edited_channel_post"],
            }),
        )
        .await
    }

    /// Offset just past the newest queued update, so posts and commands sent while
    /// the bot was down are never replayed. Offset -1 returns only the last update.
    pub async fn skip_backlog(&self) -> Result<i64, TransportError> {
        let last = self.fetch_updates(-1, 0).await?;
        Ok(next_offset(0, &last))
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send(
        &self,
        destination: DestinationId,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let msg: Message = self
            .call(
                "sendMessage",
                json!({ "chat_id": destination, "text": text }),
            )
            .await?;
        Ok(MessageHandle(msg.message_id))
    }

    async fn edit(
        &self,
        destination: DestinationId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), TransportError> {
        let result: Result<serde_json::Value, _> = self
            .call(
                "editMessageText",
                json!({ "chat_id": destination, "message_id": handle.0, "text": text }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // Same text as before; the message already shows what we want.
            Err(TransportError::Api { description, .. })
                if description.contains("message is not modified") =>
            {
                debug!(destination, handle = %handle, "Edit was a no-op");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// POLL LOOP
// =============================================================================

/// Offset that acknowledges every update in `updates`.
pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .fold(current, i64::max)
}

/// Long-poll for updates forever, forwarding each routed update to `sink`.
/// Transient failures are retried with backoff; if retries are exhausted the loop
/// pauses briefly and starts over.
pub async fn run_update_loop<F, Fut>(
    client: &TelegramClient,
    source_channel: i64,
    policy: RetryPolicy,
    metrics: Metrics,
    mut sink: F,
) where
    F: FnMut(Inbound) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!(source_channel, "[TG] update loop started");
    let mut offset = loop {
        match retry_async(&policy, "getUpdates backlog", || client.skip_backlog()).await {
            Ok(offset) => {
                info!(offset, "[TG] skipped updates queued before startup");
                break offset;
            }
            Err(e) => {
                metrics.record_transport(false);
                error!(error = %e, "[TG] ❌ could not skip backlog, retrying in {}s", POLL_RESTART_DELAY_SECS);
                tokio::time::sleep(Duration::from_secs(POLL_RESTART_DELAY_SECS)).await;
            }
        }
    };

    loop {
        let updates = match retry_async(&policy, "getUpdates", || client.get_updates(offset)).await
        {
            Ok(updates) => {
                metrics.record_transport(true);
                updates
            }
            Err(e) => {
                metrics.record_transport(false);
                error!(error = %e, "[TG] ❌ polling failed, restarting in {}s", POLL_RESTART_DELAY_SECS);
                tokio::time::sleep(Duration::from_secs(POLL_RESTART_DELAY_SECS)).await;
                continue;
            }
        };

        offset = next_offset(offset, &updates);
        for update in updates {
            match route_update(&update, source_channel) {
                Some(inbound) => {
                    if let Inbound::FeedPost { .. } = &inbound {
                        metrics.messages_received.inc();
                    }
                    sink(inbound).await;
                }
                None => debug!(update_id = update.update_id, "[TG] update ignored"),
            }
        }
    }
}

/// Log the bot identity once at startup; failure here usually means a bad token.
pub async fn verify_token(client: &TelegramClient) -> Result<(), TransportError> {
    #[derive(Deserialize)]
    struct Me {
        username: Option<String>,
    }
    match client.call::<Me>("getMe", json!({})).await {
        Ok(me) => {
            info!(username = ?me.username, "[TG] authenticated");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "[TG] getMe failed");
            Err(e)
        }
    }
}
