use anyhow::Result;
use tracing::info;

use crate::db::{
    clear_failed_posts, get_failed_posts, increment_failed_retry, remove_failed_by_normalized_link,
    remove_failed_post, upsert_failed_post, Database, FailedPost, NewFailedPost,
};

/// Durable record of failed deliveries.
///
/// Independent of the dedup store: a ledgered file is still undelivered and
/// is picked up again by the next ordinary cycle.
#[derive(Debug, Clone)]
pub struct RetryLedger {
    db: Database,
}

/// Outcome of a bulk retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries dropped because the file had since been delivered.
    pub already_delivered: usize,
}

impl RetryLedger {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a failed attempt (retry count starts at zero).
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    pub async fn record_failure(&self, post: &NewFailedPost) -> Result<()> {
        upsert_failed_post(self.db.pool(), post).await?;
        info!(link = %post.link, "Saved failed post");
        Ok(())
    }

    /// All entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn list(&self) -> Result<Vec<FailedPost>> {
        get_failed_posts(self.db.pool()).await
    }

    /// Remove one entry by link.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    pub async fn remove(&self, link: &str) -> Result<bool> {
        remove_failed_post(self.db.pool(), link).await
    }

    /// Drop every entry for a file that has now been delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    pub async fn resolve(&self, normalized_link: &str) -> Result<u64> {
        remove_failed_by_normalized_link(self.db.pool(), normalized_link).await
    }

    /// Remove all entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    pub async fn clear(&self) -> Result<u64> {
        let removed = clear_failed_posts(self.db.pool()).await?;
        info!(removed, "Cleared all failed posts");
        Ok(removed)
    }

    /// Note that a manual retry failed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    pub async fn mark_retry_failed(&self, link: &str, error: &str) -> Result<()> {
        increment_failed_retry(self.db.pool(), link, error).await
    }
}
