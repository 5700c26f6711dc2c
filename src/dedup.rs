//! In-memory delivered-file and seen-topic sets backed by the topic tables.
//!
//! The store is owned by the relay loop. Inserting into the delivered set
//! happens only after a confirmed delivery, so a crash in between can cause
//! a repeat delivery after restart but never a silently dropped file.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::db::{get_all_delivered_links, get_all_topic_urls, Database};

#[derive(Debug, Default, Clone)]
pub struct DedupStore {
    delivered: HashSet<String>,
    seen_topics: HashSet<String>,
}

impl DedupStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the sets from every persisted topic and file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be read.
    pub async fn rehydrate(db: &Database) -> Result<Self> {
        let delivered: HashSet<String> = get_all_delivered_links(db.pool())
            .await?
            .into_iter()
            .collect();
        let seen_topics: HashSet<String> =
            get_all_topic_urls(db.pool()).await?.into_iter().collect();

        info!(
            delivered = delivered.len(),
            topics = seen_topics.len(),
            "Dedup store rehydrated"
        );

        Ok(Self {
            delivered,
            seen_topics,
        })
    }

    #[must_use]
    pub fn is_delivered(&self, normalized_link: &str) -> bool {
        self.delivered.contains(normalized_link)
    }

    /// Returns `true` if the link was not already present.
    pub fn mark_delivered(&mut self, normalized_link: impl Into<String>) -> bool {
        self.delivered.insert(normalized_link.into())
    }

    #[must_use]
    pub fn is_seen(&self, topic_url: &str) -> bool {
        self.seen_topics.contains(topic_url)
    }

    pub fn mark_seen(&mut self, topic_url: impl Into<String>) -> bool {
        self.seen_topics.insert(topic_url.into())
    }

    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen_topics.len()
    }
}
