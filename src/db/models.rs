use serde::{Deserialize, Serialize};

/// Runtime-editable relay settings (single row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BotConfig {
    pub base_url: String,
    pub thumbnail_url: Option<String>,
    pub caption_template: String,
    pub topic_limit: i64,
    pub last_updated: String,
    pub updated_by: Option<i64>,
}

impl BotConfig {
    /// Maximum number of topics to process per cycle, `None` meaning unlimited.
    #[must_use]
    pub fn topic_cap(&self) -> Option<usize> {
        match usize::try_from(self.topic_limit) {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(n),
        }
    }
}

/// A forum thread that has been processed at least once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub topic_url: String,
    pub title: String,
    pub first_seen_at: String,
    pub last_updated: String,
}

/// A file that has been delivered.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopicFile {
    pub id: i64,
    pub topic_url: String,
    pub normalized_link: String,
    pub link: String,
    pub raw_title: String,
    pub size: String,
    pub posted_at: String,
}

/// Input for recording a delivered file.
#[derive(Debug, Clone)]
pub struct NewTopicFile {
    pub topic_url: String,
    pub topic_title: String,
    pub normalized_link: String,
    pub link: String,
    pub raw_title: String,
    pub size: String,
}

/// A delivery attempt that failed and is kept for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FailedPost {
    pub id: i64,
    pub link: String,
    pub normalized_link: String,
    pub topic_url: String,
    pub raw_title: String,
    pub size: String,
    pub error_message: String,
    pub failed_at: String,
    pub retry_count: i64,
}

/// Input for recording a failed delivery.
#[derive(Debug, Clone)]
pub struct NewFailedPost {
    pub link: String,
    pub normalized_link: String,
    pub topic_url: String,
    pub raw_title: String,
    pub size: String,
    pub error_message: String,
}

/// Per-day delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyStats {
    pub date: String,
    pub posts_successful: i64,
    pub posts_failed: i64,
    pub total_scraped: i64,
    pub last_updated: String,
}
