//! Telegram channel — long-polls the Bot API for updates.
//!
//! Messages (text and shared contacts) and callback queries are normalized
//! into [`InboundEvent`]s; [`Response`] descriptors are rendered as reply or
//! inline keyboards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::channels::keyboard::{self, InlineKey, InlineTarget, ReplyKey};
use crate::channels::{Channel, EventStream, SubscriptionCheck};
use crate::error::ChannelError;
use crate::session::{Action, BroadcastReport, BroadcastRequest, Button, InboundEvent, Response};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Pause between broadcast sends, keeping well under the per-bot rate limit.
const BROADCAST_PAUSE: Duration = Duration::from_millis(50);

/// Shown with the reply keyboard when the main message carries inline buttons.
const FOLLOW_UP_PROMPT: &str = "Choose an action:";

const MEMBER_STATUSES: [&str; 3] = ["member", "administrator", "creator"];

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
    terms_url: String,
    required_channel: String,
    /// Last chat each user wrote from; private chats share the user id.
    chats: Arc<RwLock<HashMap<i64, i64>>>,
}

/// A normalized update plus the routing data the channel keeps for itself.
#[derive(Debug, Clone, PartialEq)]
struct ParsedUpdate {
    event: InboundEvent,
    chat_id: i64,
    callback_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, terms_url: String, required_channel: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            terms_url,
            required_channel,
            chats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// POST a Bot API method and return its `result`.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ChannelError::Http(format!(
                "{method} failed ({status}): {description}"
            )));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a text message, splitting anything over Telegram's limit. The
    /// markup is attached to the last chunk only.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markup: Option<Value>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if i == last
                && let Some(markup) = &markup
            {
                body["reply_markup"] = markup.clone();
            }
            self.call("sendMessage", &body)
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn chat_for(&self, user_id: i64) -> i64 {
        self.chats
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(user_id)
    }

    /// Split a response into the primary markup and an optional follow-up
    /// reply keyboard. Telegram allows one markup per message, and inline
    /// buttons take precedence.
    fn render_markup(&self, response: &Response) -> (Option<Value>, Option<Value>) {
        let mut inline: Vec<Vec<InlineKey>> = response.buttons.iter().map(button_row).collect();
        if let Some(rows) =
            keyboard::inline_layout(response.keyboard, &self.terms_url, &self.required_channel)
        {
            inline.extend(rows);
        }
        let reply = keyboard::reply_layout(response.keyboard).map(reply_markup);

        if inline.is_empty() {
            (reply, None)
        } else {
            (Some(inline_markup(&inline)), reply)
        }
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let updates_url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let client = self.client.clone();
        let chats = self.chats.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&updates_url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        tracing::debug!("Telegram: skipping unsupported update");
                        continue;
                    };

                    if let Some(id) = &parsed.callback_id {
                        // Stops the client's loading spinner; failures are harmless.
                        let _ = client
                            .post(&answer_url)
                            .json(&json!({ "callback_query_id": id }))
                            .send()
                            .await;
                    }

                    chats
                        .write()
                        .await
                        .insert(parsed.event.user_id, parsed.chat_id);

                    if tx.send(parsed.event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, event: &InboundEvent, response: Response) -> Result<(), ChannelError> {
        let chat_id = self.chat_for(event.user_id).await;
        let (primary, follow_up) = self.render_markup(&response);

        self.send_message(chat_id, &response.text, primary).await?;
        if let Some(markup) = follow_up {
            self.send_message(chat_id, FOLLOW_UP_PROMPT, Some(markup))
                .await?;
        }
        Ok(())
    }

    async fn deliver_broadcast(&self, request: &BroadcastRequest) -> BroadcastReport {
        let mut report = BroadcastReport {
            total: request.recipients.len(),
            ..BroadcastReport::default()
        };

        for (i, &user_id) in request.recipients.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BROADCAST_PAUSE).await;
            }
            match self.send_message(user_id, &request.body, None).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.call("getMe", &json!({}))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionCheck for TelegramChannel {
    async fn is_subscribed(&self, user_id: i64) -> Result<bool, ChannelError> {
        if self.required_channel.is_empty() {
            return Ok(true);
        }
        let member = self
            .call(
                "getChatMember",
                &json!({ "chat_id": self.required_channel, "user_id": user_id }),
            )
            .await?;
        let status = member.get("status").and_then(Value::as_str).unwrap_or("");
        Ok(MEMBER_STATUSES.contains(&status))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Normalize a raw update. `None` for update kinds the bot does not handle.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(message) = update.get("message") {
        let from = message.get("from")?;
        let chat = message.get("chat")?;
        let chat_id = chat.get("id")?.as_i64()?;

        let action = match message
            .get("contact")
            .and_then(|c| c.get("phone_number"))
            .and_then(Value::as_str)
        {
            Some(phone) => Action::Contact(phone.to_string()),
            None => {
                let text = message.get("text")?.as_str()?;
                match keyboard::parse_text(text) {
                    Some(command) => Action::Command(command),
                    None => Action::Text(text.to_string()),
                }
            }
        };

        return Some(ParsedUpdate {
            event: event_from(from, is_private(chat), action)?,
            chat_id,
            callback_id: None,
        });
    }

    if let Some(query) = update.get("callback_query") {
        let from = query.get("from")?;
        let command = keyboard::decode_callback(query.get("data")?.as_str()?)?;
        let chat = query.get("message").and_then(|m| m.get("chat"));
        let user_id = from.get("id")?.as_i64()?;
        let chat_id = chat
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or(user_id);
        let direct = chat.is_none_or(is_private);

        return Some(ParsedUpdate {
            event: event_from(from, direct, Action::Command(command))?,
            chat_id,
            callback_id: query.get("id").and_then(Value::as_str).map(String::from),
        });
    }

    None
}

fn is_private(chat: &Value) -> bool {
    chat.get("type").and_then(Value::as_str) == Some("private")
}

fn event_from(from: &Value, direct: bool, action: Action) -> Option<InboundEvent> {
    let user_id = from.get("id")?.as_i64()?;
    let display_name = from
        .get("username")
        .or_else(|| from.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let event = InboundEvent::direct(user_id, display_name, action);
    Some(if direct { event } else { event.in_group() })
}

fn button_row(button: &Button) -> Vec<InlineKey> {
    vec![InlineKey::callback(button.label.clone(), button.command)]
}

fn inline_markup(rows: &[Vec<InlineKey>]) -> Value {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|key| match &key.target {
                    InlineTarget::Callback(data) => json!({ "text": key.label, "callback_data": data }),
                    InlineTarget::Url(url) => json!({ "text": key.label, "url": url }),
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn reply_markup(rows: Vec<Vec<ReplyKey>>) -> Value {
    let rows: Vec<Vec<Value>> = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|key| {
                    if key.request_contact {
                        json!({ "text": key.label, "request_contact": true })
                    } else {
                        json!({ "text": key.label })
                    }
                })
                .collect()
        })
        .collect();
    json!({ "keyboard": rows, "resize_keyboard": true })
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char
/// boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut end = max_len;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..end];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(end);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { end } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
