use std::fmt::Write as _;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{Access, AdminCommand, AdminContext, CommandRegistry, Invocation, Pending};
use crate::crawl::clean_title;
use crate::db::{count_delivered_files, count_failed_posts, get_bot_config};
use crate::relay::{RetryLedger, StatsAggregator, WEEK_DAYS};
use crate::settings::{apply_setting, ConfigField};

/// Entries shown by `/failed`.
const FAILED_LIST_LIMIT: usize = 20;

/// Entries shown by `/view`.
const PREVIEW_ENTRIES: usize = 5;

/// Threads `/view` will open while looking for entries.
const PREVIEW_THREAD_LIMIT: usize = 15;

/// The registry with every operator command.
#[must_use]
pub fn default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Box::new(Start));
    registry.register(Box::new(ShowConfig));
    registry.register(Box::new(SetField {
        name: "setbaseurl",
        field: ConfigField::BaseUrl,
        description: "[url] - set the forum base URL",
    }));
    registry.register(Box::new(SetField {
        name: "setthumbnail",
        field: ConfigField::ThumbnailUrl,
        description: "[url|none] - set or clear the thumbnail",
    }));
    registry.register(Box::new(SetField {
        name: "setcaption",
        field: ConfigField::CaptionTemplate,
        description: "[template] - set the caption template ({title} and {size})",
    }));
    registry.register(Box::new(SetField {
        name: "settopiclimit",
        field: ConfigField::TopicLimit,
        description: "[n] - topics per cycle (0 = unlimited)",
    }));
    registry.register(Box::new(Cancel));
    registry.register(Box::new(Stats));
    registry.register(Box::new(View));
    registry.register(Box::new(ListFailed));
    registry.register(Box::new(RetryFailed));
    registry.register(Box::new(RemoveFailed));
    registry.register(Box::new(ClearFailed));
    registry.register(Box::new(Restart));

    let text = help_text(&registry);
    registry.register(Box::new(Help { text }));
    registry
}

fn help_text(registry: &CommandRegistry) -> String {
    let mut text = String::from("Commands:\n/help - list commands");
    for command in registry.commands() {
        let _ = write!(text, "\n/{} {}", command.name(), command.description());
    }
    text
}

struct Start;

#[async_trait]
impl AdminCommand for Start {
    fn name(&self) -> &'static str {
        "start"
    }

    fn description(&self) -> &'static str {
        "- greeting"
    }

    fn access(&self) -> Access {
        Access::Anyone
    }

    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String> {
        let mut reply =
            "\u{1f44b} Hi! I relay new forum attachments to the channel.".to_string();
        if ctx.is_owner(invocation.user_id) {
            reply.push_str("\nSend /help for the list of commands.");
        }
        Ok(reply)
    }
}

/// Lists the other commands; built last from their descriptions.
struct Help {
    text: String,
}

#[async_trait]
impl AdminCommand for Help {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "- list commands"
    }

    fn access(&self) -> Access {
        Access::Anyone
    }

    async fn run(&self, _ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        Ok(self.text.clone())
    }
}

struct ShowConfig;

#[async_trait]
impl AdminCommand for ShowConfig {
    fn name(&self) -> &'static str {
        "config"
    }

    fn description(&self) -> &'static str {
        "- show the current configuration"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let config = get_bot_config(ctx.db.pool()).await?;
        let topic_limit = match config.topic_cap() {
            Some(n) => n.to_string(),
            None => "unlimited".to_string(),
        };
        let updated_by = config
            .updated_by
            .map_or_else(|| "default".to_string(), |id| id.to_string());

        Ok(format!(
            "\u{2699}\u{fe0f} Current configuration\n\n\
             Base URL: {}\n\
             Thumbnail: {}\n\
             Topic limit: {topic_limit}\n\
             Caption template:\n{}\n\n\
             Last updated: {} (by {updated_by})",
            config.base_url,
            config.thumbnail_url.as_deref().unwrap_or("none"),
            config.caption_template,
            config.last_updated,
        ))
    }
}

/// `/setX [value]`: writes immediately with a value, prompts without one.
struct SetField {
    name: &'static str,
    field: ConfigField,
    description: &'static str,
}

#[async_trait]
impl AdminCommand for SetField {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String> {
        if invocation.args.is_empty() {
            ctx.set_pending(invocation.user_id, Pending::Setting(self.field))
                .await;
            return Ok(format!("{}\nSend /cancel to abort.", self.field.prompt()));
        }

        Ok(
            match apply_setting(
                &ctx.db,
                self.field,
                invocation.args,
                Some(invocation.user_id),
            )
            .await
            {
                Ok(_) => format!("\u{2705} Updated {}.", self.field),
                Err(e) => format!("\u{274c} {e}"),
            },
        )
    }
}

struct Cancel;

#[async_trait]
impl AdminCommand for Cancel {
    fn name(&self) -> &'static str {
        "cancel"
    }

    fn description(&self) -> &'static str {
        "- abort a pending prompt"
    }

    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String> {
        Ok(match ctx.take_pending(invocation.user_id).await {
            Some(_) => "Cancelled.".to_string(),
            None => "Nothing to cancel.".to_string(),
        })
    }
}

struct Stats;

#[async_trait]
impl AdminCommand for Stats {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn description(&self) -> &'static str {
        "- today's and weekly counters"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let stats = StatsAggregator::new(ctx.db.clone());
        let today = stats.today().await?.unwrap_or_default();
        let weekly = stats.weekly().await?;
        let delivered = count_delivered_files(ctx.db.pool()).await?;
        let failed = count_failed_posts(ctx.db.pool()).await?;

        let mut reply = String::from("\u{1f4ca} Statistics\n\nToday:\n");
        let _ = writeln!(reply, "  Posted: {}", today.posts_successful);
        let _ = writeln!(reply, "  Failed: {}", today.posts_failed);
        let _ = writeln!(reply, "  Scraped: {}", today.total_scraped);

        let _ = writeln!(reply, "\nLast {WEEK_DAYS} days:");
        let _ = writeln!(reply, "  Posted: {}", weekly.posts_successful);
        let _ = writeln!(reply, "  Failed: {}", weekly.posts_failed);
        let _ = writeln!(reply, "  Scraped: {}", weekly.total_scraped);
        let _ = writeln!(
            reply,
            "  Average: {:.1} posts/day over {} day(s)",
            weekly.average_successful(),
            weekly.recorded_days()
        );
        match weekly.success_rate() {
            Some(rate) => {
                let _ = writeln!(reply, "  Success rate: {rate:.1}%");
            }
            None => reply.push_str("  Success rate: n/a\n"),
        }

        let _ = write!(
            reply,
            "\nAll time: {delivered} file(s) delivered, {failed} pending retry"
        );
        Ok(reply)
    }
}

/// One-off look at the newest entries on the forum. Delivers nothing and
/// leaves the dedup store and ledger alone.
struct View;

#[async_trait]
impl AdminCommand for View {
    fn name(&self) -> &'static str {
        "view"
    }

    fn description(&self) -> &'static str {
        "- preview the latest forum entries"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let config = get_bot_config(ctx.db.pool()).await?;
        let threads = ctx.crawler.fetch_listing(&config.base_url).await?;
        let thread_limit = config
            .topic_cap()
            .map_or(PREVIEW_THREAD_LIMIT, |cap| cap.min(PREVIEW_THREAD_LIMIT));

        let mut entries = Vec::new();
        for thread_url in threads.into_iter().take(thread_limit) {
            if entries.len() == PREVIEW_ENTRIES {
                break;
            }
            match ctx.crawler.fetch_thread(&thread_url).await {
                Ok(topic) => {
                    if let Some(file) = topic.files.first() {
                        let title =
                            clean_title(&file.raw_title, ctx.crawler.file_extension(), &file.link);
                        entries.push((title, file.size.clone()));
                    }
                }
                Err(e) => debug!(topic = %thread_url, "Preview skipped thread: {e}"),
            }
        }

        if entries.is_empty() {
            return Ok("\u{274c} No entries found.".to_string());
        }

        let mut reply = format!("\u{1f4cb} Latest {} entries\n", entries.len());
        for (i, (title, size)) in entries.iter().enumerate() {
            let _ = write!(reply, "\n{}. {title}\n\u{1f4e6} {size}\n", i + 1);
        }
        Ok(reply)
    }
}

struct ListFailed;

#[async_trait]
impl AdminCommand for ListFailed {
    fn name(&self) -> &'static str {
        "failed"
    }

    fn description(&self) -> &'static str {
        "- list failed deliveries"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let entries = RetryLedger::new(ctx.db.clone()).list().await?;
        if entries.is_empty() {
            return Ok("\u{2705} No failed posts.".to_string());
        }

        let mut reply = format!("\u{26a0}\u{fe0f} {} failed post(s)\n", entries.len());
        for entry in entries.iter().take(FAILED_LIST_LIMIT) {
            let _ = write!(
                reply,
                "\n\u{2022} {}\n  {}\n  Error: {}\n  Failed at: {} (retries: {})\n",
                entry.raw_title, entry.link, entry.error_message, entry.failed_at, entry.retry_count
            );
        }
        if entries.len() > FAILED_LIST_LIMIT {
            let _ = write!(
                reply,
                "\n...and {} more",
                entries.len() - FAILED_LIST_LIMIT
            );
        }
        reply.push_str("\n\nUse /retry to retry all, /clearfailed to drop all.");
        Ok(reply)
    }
}

struct RetryFailed;

#[async_trait]
impl AdminCommand for RetryFailed {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn description(&self) -> &'static str {
        "- retry all failed deliveries"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let report = ctx.scheduler.retry_failed().await?;
        if report.attempted == 0 && report.already_delivered == 0 {
            return Ok("\u{2705} No failed posts to retry.".to_string());
        }

        let mut reply = format!(
            "\u{1f501} Retry complete\n\nRetried: {}\nSucceeded: {}\nFailed: {}",
            report.attempted, report.succeeded, report.failed
        );
        if report.already_delivered > 0 {
            let _ = write!(
                reply,
                "\nAlready delivered: {}",
                report.already_delivered
            );
        }
        Ok(reply)
    }
}

struct RemoveFailed;

#[async_trait]
impl AdminCommand for RemoveFailed {
    fn name(&self) -> &'static str {
        "removefailed"
    }

    fn description(&self) -> &'static str {
        "- drop one failed delivery"
    }

    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String> {
        if invocation.args.is_empty() {
            return Ok("Usage: /removefailed <link>".to_string());
        }
        Ok(if ctx.scheduler.remove_failed(invocation.args).await? {
            "\u{2705} Removed.".to_string()
        } else {
            "No failed post with that link.".to_string()
        })
    }
}

struct ClearFailed;

#[async_trait]
impl AdminCommand for ClearFailed {
    fn name(&self) -> &'static str {
        "clearfailed"
    }

    fn description(&self) -> &'static str {
        "- drop all failed deliveries"
    }

    async fn run(&self, ctx: &AdminContext, _invocation: Invocation<'_>) -> Result<String> {
        let removed = ctx.scheduler.clear_failed().await?;
        Ok(format!("\u{1f5d1}\u{fe0f} Cleared {removed} failed post(s)."))
    }
}

struct Restart;

#[async_trait]
impl AdminCommand for Restart {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn description(&self) -> &'static str {
        "- restart the bot"
    }

    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String> {
        ctx.set_pending(invocation.user_id, Pending::RestartConfirmation)
            .await;
        Ok("Are you sure you want to restart the bot? Reply yes or no.".to_string())
    }
}
