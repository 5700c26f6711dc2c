//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forum_file_relay::config::Config;
use forum_file_relay::crawl::Crawler;
use forum_file_relay::db::Database;
use forum_file_relay::dedup::DedupStore;
use forum_file_relay::relay::{Scheduler, SchedulerHandle};
use forum_file_relay::settings::{apply_setting, ConfigField};
use forum_file_relay::sink::{DeliverySink, Document, SinkError};
use tempfile::TempDir;

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Point the stored configuration at a mock site with no thumbnail.
pub async fn point_at(db: &Database, base_url: &str) {
    apply_setting(db, ConfigField::BaseUrl, base_url, None)
        .await
        .expect("Failed to set base url");
    apply_setting(db, ConfigField::ThumbnailUrl, "none", None)
        .await
        .expect("Failed to clear thumbnail");
}

/// A document as the sink received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub filename: String,
    pub caption: String,
    pub content: Vec<u8>,
    pub has_thumbnail: bool,
}

/// In-memory sink that records everything and can be told to reject
/// specific filenames.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Delivered>>,
    notifications: Mutex<Vec<String>>,
    replies: Mutex<Vec<(i64, String)>>,
    rejected: Mutex<HashSet<String>>,
    notify_delay: Mutex<Option<Duration>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, filename: &str) {
        self.rejected.lock().unwrap().insert(filename.to_string());
    }

    /// Make every `notify` call hang for `delay` before succeeding.
    pub fn slow_notify(&self, delay: Duration) {
        *self.notify_delay.lock().unwrap() = Some(delay);
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .map(|d| d.filename)
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, document: Document<'_>) -> Result<(), SinkError> {
        if self.rejected.lock().unwrap().contains(&document.filename) {
            return Err(SinkError::Api {
                code: Some(400),
                description: format!("rejected {}", document.filename),
            });
        }
        self.delivered.lock().unwrap().push(Delivered {
            filename: document.filename,
            caption: document.caption,
            content: document.content,
            has_thumbnail: document.thumbnail.is_some(),
        });
        Ok(())
    }

    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        let delay = *self.notify_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.notifications.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn reply_to(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        self.replies.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Build a scheduler wired to `sink`, with the dedup store rehydrated from `db`.
pub async fn scheduler(db: &Database, sink: Arc<RecordingSink>) -> (Scheduler, SchedulerHandle) {
    scheduler_with_config(db, sink, &Config::for_testing()).await
}

pub async fn scheduler_with_config(
    db: &Database,
    sink: Arc<RecordingSink>,
    config: &Config,
) -> (Scheduler, SchedulerHandle) {
    let crawler = crawler(config);
    let dedup = DedupStore::rehydrate(db)
        .await
        .expect("Failed to rehydrate");
    Scheduler::new(config, db.clone(), sink, crawler, dedup)
}

pub fn crawler(config: &Config) -> Crawler {
    Crawler::new(reqwest::Client::new(), config.file_extension.clone())
}

pub fn listing_html(thread_paths: &[&str]) -> String {
    let anchors: String = thread_paths
        .iter()
        .map(|p| format!(r#"<li><a href="{p}">Thread</a></li>"#))
        .collect();
    format!("<html><body><ul>{anchors}</ul></body></html>")
}

/// A thread page with one `torrent` anchor per `(href, label)` pair.
pub fn thread_html(title: &str, files: &[(&str, &str)]) -> String {
    let anchors: String = files
        .iter()
        .map(|(href, label)| {
            format!(r#"<p><a data-fileext="torrent" href="{href}">{label}</a></p>"#)
        })
        .collect();
    format!("<html><head><title>{title}</title></head><body>{anchors}</body></html>")
}
