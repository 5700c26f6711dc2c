use anyhow::Result;
use chrono::{Days, Local, NaiveDate};
use tracing::debug;

use crate::db::{get_daily_stats, get_stats_since, increment_daily_stats, DailyStats, Database};

/// Length of the rolling window used by [`StatsAggregator::weekly`].
pub const WEEK_DAYS: u64 = 7;

/// Counters accumulated in memory during a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounters {
    pub successful: u64,
    pub failed: u64,
    pub scraped: u64,
}

impl CycleCounters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.successful == 0 && self.failed == 0 && self.scraped == 0
    }
}

/// Sums over the days of a window that have a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySummary {
    pub days: Vec<DailyStats>,
    pub posts_successful: i64,
    pub posts_failed: i64,
    pub total_scraped: i64,
}

impl WeeklySummary {
    fn from_days(days: Vec<DailyStats>) -> Self {
        let posts_successful = days.iter().map(|d| d.posts_successful).sum();
        let posts_failed = days.iter().map(|d| d.posts_failed).sum();
        let total_scraped = days.iter().map(|d| d.total_scraped).sum();
        Self {
            days,
            posts_successful,
            posts_failed,
            total_scraped,
        }
    }

    /// Days in the window that have a record. Missing days are not counted.
    #[must_use]
    pub fn recorded_days(&self) -> usize {
        self.days.len()
    }

    /// Average successful posts per recorded day.
    #[must_use]
    pub fn average_successful(&self) -> f64 {
        if self.days.is_empty() {
            0.0
        } else {
            self.posts_successful as f64 / self.days.len() as f64
        }
    }

    /// Share of attempts that succeeded, in percent.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let attempts = self.posts_successful + self.posts_failed;
        (attempts > 0).then(|| self.posts_successful as f64 * 100.0 / attempts as f64)
    }
}

/// Calendar day key in the process-local time zone.
#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Today's date in the process-local time zone.
#[must_use]
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Per-day counters. Values are only ever incremented.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    db: Database,
}

impl StatsAggregator {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add a cycle's counters to today's record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub async fn record(&self, counters: CycleCounters) -> Result<()> {
        self.record_on(local_today(), counters).await
    }

    /// Add counters to the record for `date`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub async fn record_on(&self, date: NaiveDate, counters: CycleCounters) -> Result<()> {
        increment_daily_stats(
            self.db.pool(),
            &date_key(date),
            i64::try_from(counters.successful).unwrap_or(i64::MAX),
            i64::try_from(counters.failed).unwrap_or(i64::MAX),
            i64::try_from(counters.scraped).unwrap_or(i64::MAX),
        )
        .await?;
        debug!(date = %date, ?counters, "Daily stats updated");
        Ok(())
    }

    /// Today's record, if any cycle has written one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn today(&self) -> Result<Option<DailyStats>> {
        get_daily_stats(self.db.pool(), &date_key(local_today())).await
    }

    /// Rollup of the last seven days including today.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn weekly(&self) -> Result<WeeklySummary> {
        self.weekly_ending(local_today()).await
    }

    /// Rollup of the seven days ending on `last_day`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn weekly_ending(&self, last_day: NaiveDate) -> Result<WeeklySummary> {
        let first_day = last_day
            .checked_sub_days(Days::new(WEEK_DAYS - 1))
            .unwrap_or(last_day);
        let last_key = date_key(last_day);
        let days = get_stats_since(self.db.pool(), &date_key(first_day))
            .await?
            .into_iter()
            .filter(|d| d.date <= last_key)
            .collect();
        Ok(WeeklySummary::from_days(days))
    }
}
