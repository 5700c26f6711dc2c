//! Startup purge of expired ledger entries and old daily records.

use chrono::{Days, SecondsFormat, Utc};
use tracing::{error, info};

use super::stats::{date_key, local_today};
use crate::config::Config;
use crate::db::{purge_failed_posts_before, purge_stats_before, Database};

/// What a housekeeping pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub failed_posts: u64,
    pub daily_stats: u64,
}

/// Purge failed posts older than the retention window and stats older than
/// the stats retention. Errors are logged, never fatal.
pub async fn purge_expired(db: &Database, config: &Config) -> PurgeReport {
    let mut report = PurgeReport::default();

    let retention = chrono::Duration::from_std(config.failed_retention)
        .unwrap_or_else(|_| chrono::Duration::hours(24));
    let cutoff = (Utc::now() - retention).to_rfc3339_opts(SecondsFormat::Secs, true);
    match purge_failed_posts_before(db.pool(), &cutoff).await {
        Ok(count) => {
            report.failed_posts = count;
            if count > 0 {
                info!(removed = count, "Purged expired failed posts");
            }
        }
        Err(e) => error!("Failed to purge failed posts: {e:#}"),
    }

    let oldest_kept = local_today()
        .checked_sub_days(Days::new(u64::from(config.stats_retention_days)))
        .unwrap_or_else(local_today);
    match purge_stats_before(db.pool(), &date_key(oldest_kept)).await {
        Ok(count) => {
            report.daily_stats = count;
            if count > 0 {
                info!(
                    removed = count,
                    retention_days = config.stats_retention_days,
                    "Purged old daily stats"
                );
            }
        }
        Err(e) => error!("Failed to purge daily stats: {e:#}"),
    }

    report
}
