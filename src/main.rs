use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_file_relay::admin::{self, AdminContext};
use forum_file_relay::config::Config;
use forum_file_relay::constants::{BROWSER_USER_AGENT, RESTART_EXIT_CODE};
use forum_file_relay::crawl::Crawler;
use forum_file_relay::db::Database;
use forum_file_relay::dedup::DedupStore;
use forum_file_relay::relay::{purge_expired, Scheduler};
use forum_file_relay::sink::{DeliverySink, TelegramSink};
use forum_file_relay::web;

/// How the process is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    Restart,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(Exit::Shutdown) => {}
        Ok(Exit::Restart) => std::process::exit(RESTART_EXIT_CODE),
        Err(e) => {
            error!("Fatal error: {e:#}");
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn run() -> Result<Exit> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting forum-file-relay");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        channel_id = config.channel_id,
        interval = ?config.poll_interval,
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    purge_expired(&db, &config).await;

    let dedup = DedupStore::rehydrate(&db)
        .await
        .context("Failed to load delivery history")?;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    let telegram =
        Arc::new(TelegramSink::new(&config).context("Failed to initialize Telegram client")?);
    let sink: Arc<dyn DeliverySink> = telegram.clone();

    let crawler = Crawler::new(client.clone(), config.file_extension.clone());
    let (scheduler, scheduler_handle) =
        Scheduler::new(&config, db.clone(), Arc::clone(&sink), crawler, dedup);

    let shutdown = CancellationToken::new();
    let restart = CancellationToken::new();

    // Liveness endpoint
    let web_config = config.clone();
    let web_shutdown = shutdown.clone();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(&web_config, web_shutdown).await {
            error!("Web server error: {e:#}");
        }
    });

    // Operator commands
    let admin_ctx = AdminContext::new(
        db.clone(),
        Arc::clone(&sink),
        scheduler_handle,
        Crawler::new(client, config.file_extension.clone()),
        config.owner_id,
        restart.clone(),
    );
    let admin_handle = tokio::spawn(admin::poll_updates(
        Arc::clone(&telegram),
        admin::default_registry(),
        admin_ctx,
        shutdown.clone(),
    ));

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    notify_owner(sink.as_ref(), config.owner_id, "\u{1f916} Bot started.").await;

    let exit = tokio::select! {
        () = shutdown_signal() => Exit::Shutdown,
        () = restart.cancelled() => Exit::Restart,
    };

    info!(?exit, "Shutting down...");
    shutdown.cancel();

    if let Err(e) = scheduler_handle.await {
        error!("Relay loop task failed: {e}");
    }
    if let Err(e) = admin_handle.await {
        error!("Admin poller task failed: {e}");
    }
    if let Err(e) = web_handle.await {
        error!("Web server task failed: {e}");
    }

    let notice = match exit {
        Exit::Restart => "\u{1f504} Bot restarting.",
        Exit::Shutdown => "\u{1f6d1} Bot stopped.",
    };
    notify_owner(sink.as_ref(), config.owner_id, notice).await;

    db.close().await;
    info!("Shutdown complete");

    Ok(exit)
}

async fn notify_owner(sink: &dyn DeliverySink, owner_id: i64, text: &str) {
    if let Err(e) = sink.reply_to(owner_id, text).await {
        warn!("Failed to notify owner: {e}");
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_file_relay=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
