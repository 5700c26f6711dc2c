use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::models::{
    BotConfig, DailyStats, FailedPost, NewFailedPost, NewTopicFile, Topic, TopicFile,
};
use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_CAPTION_TEMPLATE, DEFAULT_THUMBNAIL_URL, DEFAULT_TOPIC_LIMIT,
};

/// Current UTC time as an RFC 3339 string, the timestamp format used in every table.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ========== Bot Config ==========

/// Insert the default configuration row if none exists yet.
///
/// Returns `true` when the defaults were written.
pub async fn seed_bot_config(pool: &SqlitePool) -> Result<bool> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO bot_config
            (id, base_url, thumbnail_url, caption_template, topic_limit, last_updated, updated_by)
        VALUES (1, ?, ?, ?, ?, ?, NULL)
        ",
    )
    .bind(DEFAULT_BASE_URL)
    .bind(DEFAULT_THUMBNAIL_URL)
    .bind(DEFAULT_CAPTION_TEMPLATE)
    .bind(DEFAULT_TOPIC_LIMIT)
    .bind(now_timestamp())
    .execute(pool)
    .await
    .context("Failed to seed bot config")?;

    Ok(result.rows_affected() > 0)
}

/// Get the current configuration.
pub async fn get_bot_config(pool: &SqlitePool) -> Result<BotConfig> {
    sqlx::query_as(
        r"
        SELECT base_url, thumbnail_url, caption_template, topic_limit, last_updated, updated_by
        FROM bot_config WHERE id = 1
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to fetch bot config")
}

/// Overwrite the configuration row, stamping `last_updated`.
pub async fn update_bot_config(
    pool: &SqlitePool,
    config: &BotConfig,
    updated_by: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE bot_config
        SET base_url = ?, thumbnail_url = ?, caption_template = ?, topic_limit = ?,
            last_updated = ?, updated_by = COALESCE(?, updated_by)
        WHERE id = 1
        ",
    )
    .bind(&config.base_url)
    .bind(&config.thumbnail_url)
    .bind(&config.caption_template)
    .bind(config.topic_limit)
    .bind(now_timestamp())
    .bind(updated_by)
    .execute(pool)
    .await
    .context("Failed to update bot config")?;

    Ok(())
}

// ========== Topics ==========

/// Insert or refresh a topic row.
pub async fn upsert_topic(pool: &SqlitePool, topic_url: &str, title: &str) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        r"
        INSERT INTO topics (topic_url, title, first_seen_at, last_updated)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(topic_url) DO UPDATE SET
            title = excluded.title,
            last_updated = excluded.last_updated
        ",
    )
    .bind(topic_url)
    .bind(title)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .context("Failed to upsert topic")?;

    Ok(())
}

/// Get a topic by its URL.
pub async fn get_topic(pool: &SqlitePool, topic_url: &str) -> Result<Option<Topic>> {
    sqlx::query_as("SELECT * FROM topics WHERE topic_url = ?")
        .bind(topic_url)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch topic")
}

/// All topic URLs ever processed.
pub async fn get_all_topic_urls(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT topic_url FROM topics")
        .fetch_all(pool)
        .await
        .context("Failed to fetch topic urls")?;

    Ok(rows.into_iter().map(|(url,)| url).collect())
}

/// Record a delivered file under its topic.
///
/// Creates the topic row if it does not exist yet. Inserting a file whose
/// `normalized_link` is already present is a no-op; returns whether a row
/// was added.
pub async fn insert_topic_file(pool: &SqlitePool, file: &NewTopicFile) -> Result<bool> {
    let now = now_timestamp();
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query(
        r"
        INSERT OR IGNORE INTO topics (topic_url, title, first_seen_at, last_updated)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(&file.topic_url)
    .bind(&file.topic_title)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .context("Failed to ensure topic row")?;

    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO topic_files
            (topic_url, normalized_link, link, raw_title, size, posted_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&file.topic_url)
    .bind(&file.normalized_link)
    .bind(&file.link)
    .bind(&file.raw_title)
    .bind(&file.size)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .context("Failed to insert topic file")?;

    tx.commit().await.context("Failed to commit topic file")?;

    Ok(result.rows_affected() > 0)
}

/// Files delivered for a topic, in delivery order.
pub async fn get_topic_files(pool: &SqlitePool, topic_url: &str) -> Result<Vec<TopicFile>> {
    sqlx::query_as("SELECT * FROM topic_files WHERE topic_url = ? ORDER BY id")
        .bind(topic_url)
        .fetch_all(pool)
        .await
        .context("Failed to fetch topic files")
}

/// Every normalized link that has been delivered.
pub async fn get_all_delivered_links(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT normalized_link FROM topic_files")
        .fetch_all(pool)
        .await
        .context("Failed to fetch delivered links")?;

    Ok(rows.into_iter().map(|(link,)| link).collect())
}

/// Count delivered files.
pub async fn count_delivered_files(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM topic_files")
        .fetch_one(pool)
        .await
        .context("Failed to count delivered files")?;
    Ok(count)
}

// ========== Failed Posts ==========

/// Record a failed delivery.
///
/// A link that is already in the ledger keeps its retry count; only the
/// error and timestamp are refreshed.
pub async fn upsert_failed_post(pool: &SqlitePool, post: &NewFailedPost) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO failed_posts
            (link, normalized_link, topic_url, raw_title, size, error_message, failed_at, retry_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(link) DO UPDATE SET
            error_message = excluded.error_message,
            failed_at = excluded.failed_at
        ",
    )
    .bind(&post.link)
    .bind(&post.normalized_link)
    .bind(&post.topic_url)
    .bind(&post.raw_title)
    .bind(&post.size)
    .bind(&post.error_message)
    .bind(now_timestamp())
    .execute(pool)
    .await
    .context("Failed to save failed post")?;

    Ok(())
}

/// All failed posts, newest first.
pub async fn get_failed_posts(pool: &SqlitePool) -> Result<Vec<FailedPost>> {
    sqlx::query_as("SELECT * FROM failed_posts ORDER BY failed_at DESC, id DESC")
        .fetch_all(pool)
        .await
        .context("Failed to fetch failed posts")
}

/// Count failed posts.
pub async fn count_failed_posts(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM failed_posts")
        .fetch_one(pool)
        .await
        .context("Failed to count failed posts")?;
    Ok(count)
}

/// Remove one failed post by link. Returns whether a row was removed.
pub async fn remove_failed_post(pool: &SqlitePool, link: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM failed_posts WHERE link = ?")
        .bind(link)
        .execute(pool)
        .await
        .context("Failed to remove failed post")?;
    Ok(result.rows_affected() > 0)
}

/// Remove failed posts for a file identity, whatever mirror they were seen on.
pub async fn remove_failed_by_normalized_link(
    pool: &SqlitePool,
    normalized_link: &str,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM failed_posts WHERE normalized_link = ?")
        .bind(normalized_link)
        .execute(pool)
        .await
        .context("Failed to remove failed post")?;
    Ok(result.rows_affected())
}

/// Remove every failed post. Returns the number removed.
pub async fn clear_failed_posts(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM failed_posts")
        .execute(pool)
        .await
        .context("Failed to clear failed posts")?;
    Ok(result.rows_affected())
}

/// Bump the retry count after a manual retry failed again.
pub async fn increment_failed_retry(pool: &SqlitePool, link: &str, error: &str) -> Result<()> {
    sqlx::query(
        r"
        UPDATE failed_posts
        SET retry_count = retry_count + 1, error_message = ?, failed_at = ?
        WHERE link = ?
        ",
    )
    .bind(error)
    .bind(now_timestamp())
    .bind(link)
    .execute(pool)
    .await
    .context("Failed to update failed post retry count")?;
    Ok(())
}

/// Delete failed posts recorded before `cutoff` (RFC 3339).
pub async fn purge_failed_posts_before(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM failed_posts WHERE failed_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to purge old failed posts")?;
    Ok(result.rows_affected())
}

// ========== Daily Stats ==========

/// Add the given counts to the record for `date` (`YYYY-MM-DD`).
pub async fn increment_daily_stats(
    pool: &SqlitePool,
    date: &str,
    posts_successful: i64,
    posts_failed: i64,
    total_scraped: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO daily_stats (date, posts_successful, posts_failed, total_scraped, last_updated)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(date) DO UPDATE SET
            posts_successful = posts_successful + excluded.posts_successful,
            posts_failed = posts_failed + excluded.posts_failed,
            total_scraped = total_scraped + excluded.total_scraped,
            last_updated = excluded.last_updated
        ",
    )
    .bind(date)
    .bind(posts_successful)
    .bind(posts_failed)
    .bind(total_scraped)
    .bind(now_timestamp())
    .execute(pool)
    .await
    .context("Failed to update daily stats")?;

    Ok(())
}

/// Get the record for a single day.
pub async fn get_daily_stats(pool: &SqlitePool, date: &str) -> Result<Option<DailyStats>> {
    sqlx::query_as("SELECT * FROM daily_stats WHERE date = ?")
        .bind(date)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch daily stats")
}

/// Records for every day on or after `since` (`YYYY-MM-DD`), oldest first.
pub async fn get_stats_since(pool: &SqlitePool, since: &str) -> Result<Vec<DailyStats>> {
    sqlx::query_as("SELECT * FROM daily_stats WHERE date >= ? ORDER BY date")
        .bind(since)
        .fetch_all(pool)
        .await
        .context("Failed to fetch stats range")
}

/// Delete records for days before `before` (`YYYY-MM-DD`).
pub async fn purge_stats_before(pool: &SqlitePool, before: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM daily_stats WHERE date < ?")
        .bind(before)
        .execute(pool)
        .await
        .context("Failed to purge old stats")?;
    Ok(result.rows_affected())
}
