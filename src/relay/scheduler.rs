//! The relay loop: fetch → filter → deliver → persist → sleep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::delivery::{fetch_content, make_filename, render_caption, DeliveryError};
use super::ledger::{RetryLedger, RetryReport};
use super::stats::{CycleCounters, StatsAggregator};
use super::thumbnail::ThumbnailCache;
use crate::config::Config;
use crate::crawl::{clean_title, Crawler, ScrapedFile, ScrapedTopic};
use crate::db::{get_bot_config, insert_topic_file, upsert_topic, BotConfig, Database, NewFailedPost, NewTopicFile};
use crate::dedup::DedupStore;
use crate::sink::{DeliverySink, Document};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Filtering,
    Delivering,
    Persisting,
    Sleeping,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Delivering => "delivering",
            Self::Persisting => "persisting",
            Self::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Ledger operations requested from outside the loop.
///
/// They run between cycles so the dedup store, ledger and counters keep a
/// single writer.
#[derive(Debug)]
pub enum SchedulerCommand {
    RetryFailed { reply: oneshot::Sender<RetryReport> },
    RemoveFailed { link: String, reply: oneshot::Sender<bool> },
    ClearFailed { reply: oneshot::Sender<u64> },
}

/// Cloneable sender for [`SchedulerCommand`]s.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("relay loop is not running"))?;
        rx.await
            .map_err(|_| anyhow!("relay loop dropped the request"))
    }

    /// Retry every ledger entry. Waits for the current cycle to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop has stopped.
    pub async fn retry_failed(&self) -> Result<RetryReport> {
        self.request(|reply| SchedulerCommand::RetryFailed { reply })
            .await
    }

    /// Remove one ledger entry by link.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop has stopped.
    pub async fn remove_failed(&self, link: &str) -> Result<bool> {
        let link = link.to_string();
        self.request(|reply| SchedulerCommand::RemoveFailed { link, reply })
            .await
    }

    /// Remove every ledger entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop has stopped.
    pub async fn clear_failed(&self) -> Result<u64> {
        self.request(|reply| SchedulerCommand::ClearFailed { reply })
            .await
    }
}

/// Result of processing one topic in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    /// Seen before and nothing new: no attempts, no writes.
    Skipped,
    Processed { delivered: usize, failed: usize },
}

enum Wake {
    Shutdown,
    Tick,
    Command(Option<SchedulerCommand>),
}

/// The single relay loop. Owns all dedup, ledger and counter state.
pub struct Scheduler {
    db: Database,
    sink: Arc<dyn DeliverySink>,
    crawler: Crawler,
    dedup: DedupStore,
    ledger: RetryLedger,
    stats: StatsAggregator,
    thumbnails: ThumbnailCache,
    counters: CycleCounters,
    attempts_this_cycle: usize,
    state: CycleState,
    poll_interval: Duration,
    delivery_pause: Duration,
    commands: mpsc::Receiver<SchedulerCommand>,
    /// Checked between items; an item in flight always finishes and persists.
    stop: CancellationToken,
}

impl Scheduler {
    /// Build the loop and the handle used to send it ledger commands.
    #[must_use]
    pub fn new(
        config: &Config,
        db: Database,
        sink: Arc<dyn DeliverySink>,
        crawler: Crawler,
        dedup: DedupStore,
    ) -> (Self, SchedulerHandle) {
        let (tx, commands) = mpsc::channel(16);
        let scheduler = Self {
            ledger: RetryLedger::new(db.clone()),
            stats: StatsAggregator::new(db.clone()),
            db,
            sink,
            crawler,
            dedup,
            thumbnails: ThumbnailCache::new(),
            counters: CycleCounters::default(),
            attempts_this_cycle: 0,
            state: CycleState::Idle,
            poll_interval: config.poll_interval,
            delivery_pause: config.delivery_pause,
            commands,
            stop: CancellationToken::new(),
        };
        (scheduler, SchedulerHandle { tx })
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        self.state
    }

    #[must_use]
    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Counters not yet written to the daily record.
    #[must_use]
    pub fn pending_counters(&self) -> CycleCounters {
        self.counters
    }

    /// Run until `shutdown` is cancelled, then flush pending counters.
    ///
    /// A cycle in progress stops at the next item boundary, so a file the
    /// sink accepted is always recorded before the loop exits.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval = ?self.poll_interval, "Relay loop started");
        self.stop = shutdown.clone();
        let mut commands_open = true;

        'outer: loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.run_cycle().await;

            self.state = CycleState::Sleeping;
            let deadline = Instant::now() + self.poll_interval;
            loop {
                let wake = tokio::select! {
                    () = shutdown.cancelled() => Wake::Shutdown,
                    () = tokio::time::sleep_until(deadline) => Wake::Tick,
                    cmd = self.commands.recv(), if commands_open => Wake::Command(cmd),
                };

                match wake {
                    Wake::Shutdown => break 'outer,
                    Wake::Tick => break,
                    Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                    Wake::Command(None) => commands_open = false,
                }
            }
        }

        self.shutdown().await;
    }

    /// Run one cycle; errors are logged, never propagated.
    pub async fn run_cycle(&mut self) {
        if let Err(e) = self.cycle().await {
            error!("Relay cycle failed: {e:#}");
        }
        self.flush_counters().await;
        self.state = CycleState::Idle;
    }

    async fn cycle(&mut self) -> Result<()> {
        self.state = CycleState::Fetching;
        self.attempts_this_cycle = 0;
        self.thumbnails.forget_failure();

        let config = get_bot_config(self.db.pool())
            .await
            .context("Failed to read bot config")?;

        // Nothing is persisted during extraction; it is dropped on shutdown.
        let topics = tokio::select! {
            topics = self.crawler.crawl(&config.base_url, config.topic_cap()) => topics,
            () = self.stop.cancelled() => {
                info!("Shutdown requested during extraction");
                return Ok(());
            }
        };
        let scraped: usize = topics.iter().map(|t| t.files.len()).sum();
        self.counters.scraped += scraped as u64;
        debug!(topics = topics.len(), files = scraped, "Extraction complete");

        let mut delivered = 0;
        let mut failed = 0;
        for topic in &topics {
            if self.stop.is_cancelled() {
                info!("Shutdown requested, ending cycle early");
                break;
            }
            if let TopicOutcome::Processed {
                delivered: d,
                failed: f,
            } = self.process_topic(&config, topic).await
            {
                delivered += d;
                failed += f;
            }
        }

        if delivered > 0 || failed > 0 {
            info!(delivered, failed, "Cycle complete");
        }
        Ok(())
    }

    /// Deliver the new files of one topic and persist it.
    pub async fn process_topic(&mut self, config: &BotConfig, topic: &ScrapedTopic) -> TopicOutcome {
        self.state = CycleState::Filtering;
        let new_files: Vec<&ScrapedFile> = topic
            .files
            .iter()
            .filter(|f| !self.dedup.is_delivered(&f.normalized_link))
            .collect();

        if self.dedup.is_seen(&topic.topic_url) && new_files.is_empty() {
            return TopicOutcome::Skipped;
        }

        self.state = CycleState::Delivering;
        let mut delivered = 0;
        let mut failed = 0;
        for file in new_files {
            if self.attempts_this_cycle > 0 && !self.pause_before_attempt().await {
                break;
            }
            self.attempts_this_cycle += 1;

            match self
                .deliver_item(config, &file.link, &file.raw_title, &file.size)
                .await
            {
                Ok(title) => {
                    self.record_delivery(&topic.topic_url, &topic.title, file)
                        .await;
                    self.counters.successful += 1;
                    delivered += 1;
                    self.forward_link(&title, &file.link).await;
                }
                Err(e) => {
                    warn!(link = %file.link, "Delivery failed: {e}");
                    let entry = NewFailedPost {
                        link: file.link.clone(),
                        normalized_link: file.normalized_link.clone(),
                        topic_url: topic.topic_url.clone(),
                        raw_title: file.raw_title.clone(),
                        size: file.size.clone(),
                        error_message: e.to_string(),
                    };
                    if let Err(e) = self.ledger.record_failure(&entry).await {
                        error!(link = %file.link, "Failed to save failed post: {e:#}");
                    }
                    self.counters.failed += 1;
                    failed += 1;
                }
            }
        }

        self.state = CycleState::Persisting;
        if let Err(e) = upsert_topic(self.db.pool(), &topic.topic_url, &topic.title).await {
            error!(topic = %topic.topic_url, "Failed to save topic: {e:#}");
        }
        self.dedup.mark_seen(topic.topic_url.clone());
        debug!(topic = %topic.topic_url, delivered, failed, "Topic processed");

        TopicOutcome::Processed { delivered, failed }
    }

    /// Wait out the pause between attempts. Returns `false` if shutdown was
    /// requested, in which case no further attempt should start.
    async fn pause_before_attempt(&self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        if self.delivery_pause.is_zero() {
            return true;
        }
        tokio::select! {
            () = self.stop.cancelled() => false,
            () = tokio::time::sleep(self.delivery_pause) => true,
        }
    }

    /// Fetch a file and hand it to the sink. Returns the cleaned title.
    async fn deliver_item(
        &mut self,
        config: &BotConfig,
        link: &str,
        raw_title: &str,
        size: &str,
    ) -> Result<String, DeliveryError> {
        let extension = self.crawler.file_extension().to_string();
        let title = clean_title(raw_title, &extension, link);
        let content = fetch_content(self.crawler.client(), link).await?;
        let thumbnail = self
            .thumbnails
            .get(self.crawler.client(), config.thumbnail_url.as_deref())
            .await;

        let document = Document {
            content,
            filename: make_filename(&title, &extension),
            caption: render_caption(&config.caption_template, &title, size),
            thumbnail,
        };
        self.sink.deliver(document).await?;
        info!(title = %title, "Posted file");
        Ok(title)
    }

    /// Best-effort secondary link forward, sent after the delivery is recorded.
    /// Abandoned on shutdown.
    async fn forward_link(&self, title: &str, link: &str) {
        let text = format!("{title}\n{link}");
        tokio::select! {
            result = self.sink.notify(&text) => {
                if let Err(e) = result {
                    warn!(link = %link, "Secondary link forward failed: {e}");
                }
            }
            () = self.stop.cancelled() => {
                debug!(link = %link, "Skipping link forward on shutdown");
            }
        }
    }

    /// Mark a delivered file in memory and on disk, and drop any ledger entries for it.
    async fn record_delivery(&mut self, topic_url: &str, topic_title: &str, file: &ScrapedFile) {
        self.dedup.mark_delivered(file.normalized_link.clone());

        let row = NewTopicFile {
            topic_url: topic_url.to_string(),
            topic_title: topic_title.to_string(),
            normalized_link: file.normalized_link.clone(),
            link: file.link.clone(),
            raw_title: file.raw_title.clone(),
            size: file.size.clone(),
        };
        if let Err(e) = insert_topic_file(self.db.pool(), &row).await {
            error!(link = %file.link, "Failed to persist delivered file: {e:#}");
        }
        if let Err(e) = self.ledger.resolve(&file.normalized_link).await {
            warn!(link = %file.link, "Failed to clear ledger entry: {e:#}");
        }
    }

    async fn flush_counters(&mut self) {
        if self.counters.is_empty() {
            return;
        }
        match self.stats.record(self.counters).await {
            Ok(()) => self.counters = CycleCounters::default(),
            Err(e) => error!("Failed to update daily stats, keeping counters: {e:#}"),
        }
    }

    /// Execute a ledger command.
    pub async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::RetryFailed { reply } => {
                let report = match self.retry_failed().await {
                    Ok(report) => report,
                    Err(e) => {
                        error!("Bulk retry failed: {e:#}");
                        RetryReport::default()
                    }
                };
                let _ = reply.send(report);
            }
            SchedulerCommand::RemoveFailed { link, reply } => {
                let removed = self.ledger.remove(&link).await.unwrap_or_else(|e| {
                    error!(link = %link, "Failed to remove failed post: {e:#}");
                    false
                });
                let _ = reply.send(removed);
            }
            SchedulerCommand::ClearFailed { reply } => {
                let removed = self.ledger.clear().await.unwrap_or_else(|e| {
                    error!("Failed to clear failed posts: {e:#}");
                    0
                });
                let _ = reply.send(removed);
            }
        }
    }

    /// Re-attempt every ledger entry through the ordinary delivery path.
    ///
    /// Store errors on individual entries are logged and the run continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or ledger cannot be read.
    pub async fn retry_failed(&mut self) -> Result<RetryReport> {
        let config = get_bot_config(self.db.pool())
            .await
            .context("Failed to read bot config")?;
        let entries = self.ledger.list().await?;
        let mut report = RetryReport::default();

        for entry in entries {
            if self.dedup.is_delivered(&entry.normalized_link) {
                if let Err(e) = self.ledger.remove(&entry.link).await {
                    error!(link = %entry.link, "Failed to drop delivered ledger entry: {e:#}");
                }
                report.already_delivered += 1;
                continue;
            }

            if report.attempted > 0 && !self.pause_before_attempt().await {
                break;
            }
            report.attempted += 1;

            match self
                .deliver_item(&config, &entry.link, &entry.raw_title, &entry.size)
                .await
            {
                Ok(title) => {
                    let file = ScrapedFile {
                        link: entry.link.clone(),
                        normalized_link: entry.normalized_link.clone(),
                        raw_title: entry.raw_title.clone(),
                        size: entry.size.clone(),
                    };
                    self.record_delivery(&entry.topic_url, &title, &file).await;
                    self.counters.successful += 1;
                    report.succeeded += 1;
                    self.forward_link(&title, &entry.link).await;
                }
                Err(delivery_err) => {
                    warn!(link = %entry.link, "Retry failed: {delivery_err}");
                    if let Err(e) = self
                        .ledger
                        .mark_retry_failed(&entry.link, &delivery_err.to_string())
                        .await
                    {
                        error!(link = %entry.link, "Failed to update failed post: {e:#}");
                    }
                    report.failed += 1;
                }
            }
        }

        info!(?report, "Bulk retry complete");
        Ok(report)
    }

    /// Write any counters that a cancelled cycle left behind.
    async fn shutdown(&mut self) {
        self.flush_counters().await;
        self.state = CycleState::Idle;
        info!("Relay loop stopped");
    }
}
