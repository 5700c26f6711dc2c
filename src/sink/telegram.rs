//! Telegram Bot API transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DeliverySink, Document, SinkError};
use crate::config::Config;
use crate::constants::MAX_MESSAGE_CHARS;

/// Long-poll duration requested from `getUpdates`.
const LONG_POLL_SECS: u64 = 30;

/// Captions longer than this are rejected by the Bot API.
const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// An incoming update from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

/// Sink backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramSink {
    http: reqwest::Client,
    api_url: String,
    token: String,
    channel_id: i64,
    log_chat_id: Option<i64>,
    parse_mode: Option<String>,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("api_url", &self.api_url)
            .field("channel_id", &self.channel_id)
            .field("log_chat_id", &self.log_chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramSink {
    /// Create a sink from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, SinkError> {
        // Must outlive the getUpdates long poll.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
            .build()?;

        Ok(Self {
            http,
            api_url: config.telegram_api_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            channel_id: config.channel_id,
            log_chat_id: config.log_chat_id,
            parse_mode: config.caption_parse_mode.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SinkError> {
        let body: ApiResponse<T> = response.json().await?;
        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            other => Err(SinkError::Api {
                code: other.error_code,
                description: other
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    /// Send a plain text message, split into chunks when too long.
    ///
    /// # Errors
    ///
    /// Returns an error if any chunk is rejected.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let response = self
                .http
                .post(self.method_url("sendMessage"))
                .json(&SendMessage {
                    chat_id,
                    text: chunk,
                    disable_web_page_preview: true,
                })
                .send()
                .await?;
            let _: serde_json::Value = Self::decode(response).await?;
            if i < last {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Ok(())
    }

    /// Long-poll for updates with ids at or above `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or API rejection.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, SinkError> {
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .json(&GetUpdates {
                offset,
                timeout: LONG_POLL_SECS,
                allowed_updates: ["message"],
            })
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn deliver(&self, document: Document<'_>) -> Result<(), SinkError> {
        let caption: String = document.caption.chars().take(MAX_CAPTION_CHARS).collect();
        let part = multipart::Part::bytes(document.content).file_name(document.filename.clone());

        let mut form = multipart::Form::new()
            .text("chat_id", self.channel_id.to_string())
            .text("caption", caption)
            .part("document", part);
        if let Some(mode) = &self.parse_mode {
            form = form.text("parse_mode", mode.clone());
        }
        if let Some(thumb) = document.thumbnail {
            let thumb_part = multipart::Part::bytes(thumb.to_vec()).file_name("thumb.jpg");
            form = form.part("thumbnail", thumb_part);
        }

        debug!(filename = %document.filename, "Sending document");

        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        match self.log_chat_id {
            Some(chat_id) => self.send_message(chat_id, text).await,
            None => Ok(()),
        }
    }

    async fn reply_to(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        self.send_message(chat_id, text).await
    }
}

/// Split text into chunks of at most `max_chars` characters.
#[must_use]
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_message_respects_char_boundaries() {
        let text = "\u{1f4e6}".repeat(5);
        let chunks = split_message(&text, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "\u{1f4e6}");
    }

    #[test]
    fn test_decode_error_response() {
        let body: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        assert!(!body.ok);
        assert_eq!(body.error_code, Some(400));
    }
}
