use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Runtime-editable settings; a single row with id = 1
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS bot_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            base_url TEXT NOT NULL,
            thumbnail_url TEXT,
            caption_template TEXT NOT NULL,
            topic_limit INTEGER NOT NULL DEFAULT 0 CHECK (topic_limit >= 0),
            last_updated TEXT NOT NULL,
            updated_by INTEGER
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create bot_config table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topics (
            topic_url TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            last_updated TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topics table")?;

    // Delivered files; normalized_link is the dedup identity
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS topic_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_url TEXT NOT NULL REFERENCES topics(topic_url) ON DELETE CASCADE,
            normalized_link TEXT NOT NULL UNIQUE,
            link TEXT NOT NULL,
            raw_title TEXT NOT NULL,
            size TEXT NOT NULL,
            posted_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create topic_files table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS failed_posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            link TEXT NOT NULL UNIQUE,
            normalized_link TEXT NOT NULL,
            topic_url TEXT NOT NULL,
            raw_title TEXT NOT NULL,
            size TEXT NOT NULL,
            error_message TEXT NOT NULL,
            failed_at TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create failed_posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS daily_stats (
            date TEXT PRIMARY KEY,
            posts_successful INTEGER NOT NULL DEFAULT 0,
            posts_failed INTEGER NOT NULL DEFAULT 0,
            total_scraped INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create daily_stats table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding lookup indexes");

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_topic_files_topic ON topic_files(topic_url)")
        .execute(pool)
        .await
        .context("Failed to create topic_files topic index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_failed_posts_failed_at ON failed_posts(failed_at)")
        .execute(pool)
        .await
        .context("Failed to create failed_posts failed_at index")?;

    Ok(())
}
