//! Operator command surface.
//!
//! Incoming chat messages are routed through a [`CommandRegistry`]: a table of
//! named commands, each with an [`Access`] rule. Commands that need a value
//! and were sent without one open a per-user prompt; the operator's next plain
//! message answers it.

mod commands;
mod poller;

pub use commands::default_registry;
pub use poller::poll_updates;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::crawl::Crawler;
use crate::db::Database;
use crate::relay::SchedulerHandle;
use crate::settings::{apply_setting, ConfigField};
use crate::sink::{DeliverySink, IncomingMessage};

/// Who may run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Anyone,
    Owner,
}

/// A reply the surface is waiting for from one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Setting(ConfigField),
    RestartConfirmation,
}

/// A parsed command message.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub user_id: i64,
    /// Everything after the command word, trimmed.
    pub args: &'a str,
}

/// Shared state handed to every command.
pub struct AdminContext {
    pub db: Database,
    pub sink: Arc<dyn DeliverySink>,
    pub scheduler: SchedulerHandle,
    /// Read-only crawler for previews. Separate from the relay loop's.
    pub crawler: Crawler,
    pub owner_id: i64,
    /// Cancelled when the operator confirms a restart.
    pub restart: CancellationToken,
    pending: Mutex<HashMap<i64, Pending>>,
}

impl AdminContext {
    #[must_use]
    pub fn new(
        db: Database,
        sink: Arc<dyn DeliverySink>,
        scheduler: SchedulerHandle,
        crawler: Crawler,
        owner_id: i64,
        restart: CancellationToken,
    ) -> Self {
        Self {
            db,
            sink,
            scheduler,
            crawler,
            owner_id,
            restart,
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn is_owner(&self, user_id: i64) -> bool {
        user_id == self.owner_id
    }

    /// Wait for the next plain message from `user_id`.
    pub async fn set_pending(&self, user_id: i64, pending: Pending) {
        self.pending.lock().await.insert(user_id, pending);
    }

    pub async fn take_pending(&self, user_id: i64) -> Option<Pending> {
        self.pending.lock().await.remove(&user_id)
    }

    pub async fn pending(&self, user_id: i64) -> Option<Pending> {
        self.pending.lock().await.get(&user_id).copied()
    }
}

/// A named operator command.
#[async_trait]
pub trait AdminCommand: Send + Sync {
    /// Command word without the leading slash.
    fn name(&self) -> &'static str;

    /// One-line description for `/help`.
    fn description(&self) -> &'static str;

    fn access(&self) -> Access {
        Access::Owner
    }

    /// Run the command and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if a store or scheduler operation fails; the caller
    /// reports it to the operator.
    async fn run(&self, ctx: &AdminContext, invocation: Invocation<'_>) -> Result<String>;
}

pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command. Send /help for the list of commands.";
pub const UNAUTHORIZED_REPLY: &str = "\u{26d4} You are not authorized to use this command.";

/// Dispatch table of operator commands.
pub struct CommandRegistry {
    commands: Vec<Box<dyn AdminCommand>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn register(&mut self, command: Box<dyn AdminCommand>) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&dyn AdminCommand> {
        self.commands
            .iter()
            .find(|c| c.name() == name)
            .map(AsRef::as_ref)
    }

    #[must_use]
    pub fn commands(&self) -> &[Box<dyn AdminCommand>] {
        &self.commands
    }

    /// Handle one incoming message and return the reply, if any.
    pub async fn handle(&self, ctx: &AdminContext, message: &IncomingMessage) -> Option<String> {
        let text = message.text.as_deref()?.trim();
        let user_id = message.from.as_ref()?.id;

        match parse_command(text) {
            Some((name, args)) => {
                let invocation = Invocation { user_id, args };
                Some(self.dispatch(ctx, name, invocation).await)
            }
            None => answer_pending(ctx, user_id, text).await,
        }
    }

    async fn dispatch(&self, ctx: &AdminContext, name: &str, invocation: Invocation<'_>) -> String {
        let Some(command) = self.find(name) else {
            return UNKNOWN_COMMAND_REPLY.to_string();
        };

        if command.access() == Access::Owner && !ctx.is_owner(invocation.user_id) {
            warn!(
                user_id = invocation.user_id,
                command = name,
                "Unauthorized command attempt"
            );
            return UNAUTHORIZED_REPLY.to_string();
        }

        // Any command replaces an open prompt.
        if name != "cancel" {
            ctx.take_pending(invocation.user_id).await;
        }

        match command.run(ctx, invocation).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = name, "Command failed: {e:#}");
                format!("\u{274c} Error: {e}")
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `/name@bot args` into `("name", "args")`.
#[must_use]
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let (word, args) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    let name = word.split('@').next().unwrap_or(word);
    if name.is_empty() {
        return None;
    }
    Some((name, args.trim()))
}

async fn answer_pending(ctx: &AdminContext, user_id: i64, text: &str) -> Option<String> {
    let pending = ctx.pending(user_id).await?;

    let reply = match pending {
        Pending::Setting(field) => {
            match apply_setting(&ctx.db, field, text, Some(user_id)).await {
                Ok(_) => {
                    ctx.take_pending(user_id).await;
                    format!("\u{2705} {} updated.", capitalize(field.label()))
                }
                Err(e) => format!("\u{274c} {e}\nTry again or send /cancel."),
            }
        }
        Pending::RestartConfirmation => match text.to_ascii_lowercase().as_str() {
            "yes" | "y" => {
                ctx.take_pending(user_id).await;
                info!(user_id, "Restart confirmed by operator");
                ctx.restart.cancel();
                "\u{1f504} Restarting...".to_string()
            }
            "no" | "n" => {
                ctx.take_pending(user_id).await;
                "Restart cancelled.".to_string()
            }
            _ => "Please reply yes or no.".to_string(),
        },
    };
    Some(reply)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
