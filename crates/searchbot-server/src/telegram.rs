use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use searchbot_config::Telegram;
use searchbot_contracts::{
    ButtonTarget, ChatUser, EventKind, FileAttachment, InboundEvent, InlineKeyboard,
    OutgoingMessage,
};
use serde_json::{json, Value};

use crate::transport::{ChatTransport, TransportError};

/// Telegram Bot API adapter.
pub struct TelegramTransport {
    http: Client,
    api_base_url: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(cfg: &Telegram) -> Result<Self, String> {
        let http = Client::builder()
            // long polls hold the connection for poll_timeout_secs
            .timeout(Duration::from_secs(cfg.poll_timeout_secs + 30))
            .build()
            .map_err(|e| format!("failed to build telegram http client: {e}"))?;
        Ok(Self {
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            bot_token: cfg.bot_token.clone(),
        })
    }

    async fn api(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let url = format!("{}/bot{}/{method}", self.api_base_url, self.bot_token);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = payload
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(TransportError::Api(format!("{method}: {description}")));
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, TransportError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        match self.api("getUpdates", &body).await? {
            Value::Array(updates) => Ok(updates),
            _ => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "text": message.text,
        });
        if let Some(keyboard) = &message.keyboard {
            body["reply_markup"] = reply_markup(keyboard);
        }
        let method = match message.edit_message_id {
            Some(message_id) => {
                body["message_id"] = json!(message_id);
                "editMessageText"
            }
            None => "sendMessage",
        };
        self.api(method, &body).await.map(|_| ())
    }

    async fn answer_button(&self, callback_id: &str) -> Result<(), TransportError> {
        self.api(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_id }),
        )
        .await
        .map(|_| ())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let file = self.api("getFile", &json!({ "file_id": file_id })).await?;
        let path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::File(format!("no file_path for {file_id}")))?;
        let url = format!("{}/file/bot{}/{path}", self.api_base_url, self.bot_token);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::File(format!(
                "download of {file_id} returned {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn reply_markup(keyboard: &InlineKeyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.target {
                    ButtonTarget::Callback { payload } => {
                        json!({ "text": button.label, "callback_data": payload })
                    }
                    ButtonTarget::Url { url } => json!({ "text": button.label, "url": url }),
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Maps a raw Telegram update onto an [`InboundEvent`]. Updates without a
/// sender or of an unhandled kind yield `None`.
pub fn parse_update(update: &Value) -> Option<InboundEvent> {
    if let Some(query) = update.get("callback_query") {
        let user = parse_user(query.get("from")?)?;
        let message = query.get("message");
        let chat_id = message
            .and_then(|m| m.pointer("/chat/id"))
            .and_then(Value::as_i64)
            .unwrap_or(user.id);
        return Some(InboundEvent {
            user,
            chat_id,
            kind: EventKind::Button {
                payload: query.get("data")?.as_str()?.to_string(),
                message_id: message
                    .and_then(|m| m.get("message_id"))
                    .and_then(Value::as_i64),
                callback_id: query.get("id").and_then(Value::as_str).map(str::to_string),
            },
        });
    }

    let message = update.get("message")?;
    let user = parse_user(message.get("from")?)?;
    let chat_id = message.pointer("/chat/id")?.as_i64()?;

    let kind = if let Some(text) = message.get("text").and_then(Value::as_str) {
        text_kind(text)
    } else if let Some(doc) = message.get("document") {
        EventKind::File {
            attachment: attachment(doc, None, message)?,
        }
    } else if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
        let largest = sizes.last()?;
        let name = format!(
            "photo_{}.jpg",
            largest
                .get("file_unique_id")
                .and_then(Value::as_str)
                .unwrap_or("upload")
        );
        EventKind::File {
            attachment: attachment(largest, Some(name), message)?,
        }
    } else if let Some(audio) = message.get("audio") {
        EventKind::File {
            attachment: attachment(audio, Some("audio.mp3".to_string()), message)?,
        }
    } else if let Some(voice) = message.get("voice") {
        EventKind::File {
            attachment: attachment(voice, Some("voice.ogg".to_string()), message)?,
        }
    } else {
        return None;
    };

    Some(InboundEvent {
        user,
        chat_id,
        kind,
    })
}

fn parse_user(from: &Value) -> Option<ChatUser> {
    Some(ChatUser {
        id: from.get("id")?.as_i64()?,
        username: from
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string),
        first_name: from
            .get("first_name")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn text_kind(text: &str) -> EventKind {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('/') {
        let mut parts = rest.split_whitespace();
        if let Some(name) = parts.next() {
            return EventKind::Command {
                name: name.to_string(),
                args: parts.map(str::to_string).collect(),
            };
        }
    }
    EventKind::Text {
        text: text.to_string(),
    }
}

fn attachment(file: &Value, fallback_name: Option<String>, message: &Value) -> Option<FileAttachment> {
    Some(FileAttachment {
        file_id: file.get("file_id")?.as_str()?.to_string(),
        file_name: file
            .get("file_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(fallback_name),
        size_bytes: file.get("file_size").and_then(Value::as_u64),
        mime_type: file
            .get("mime_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        caption: message
            .get("caption")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
