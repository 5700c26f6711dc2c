//! Delivery sink capability and its Telegram implementation.

mod telegram;

pub use telegram::{split_message, Chat, IncomingMessage, TelegramSink, Update, User};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API rejected request ({code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
}

/// A file to publish to the destination channel.
#[derive(Debug, Clone)]
pub struct Document<'a> {
    pub content: Vec<u8>,
    pub filename: String,
    pub caption: String,
    pub thumbnail: Option<&'a [u8]>,
}

/// The narrow set of outbound operations the relay and admin surface need.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Publish a document to the destination channel.
    async fn deliver(&self, document: Document<'_>) -> Result<(), SinkError>;

    /// Send a text to the secondary destination. A no-op when none is configured.
    async fn notify(&self, text: &str) -> Result<(), SinkError>;

    /// Send a text to a specific chat (admin replies).
    async fn reply_to(&self, chat_id: i64, text: &str) -> Result<(), SinkError>;
}
