//! Delivery pipeline: the relay loop and the state it owns.

mod delivery;
mod housekeeping;
mod ledger;
mod scheduler;
mod stats;
mod thumbnail;

pub use delivery::{
    fetch_content, make_filename, render_caption, DeliveryError, SIZE_TOKEN, TITLE_TOKEN,
};
pub use housekeeping::{purge_expired, PurgeReport};
pub use ledger::{RetryLedger, RetryReport};
pub use scheduler::{CycleState, Scheduler, SchedulerCommand, SchedulerHandle, TopicOutcome};
pub use stats::{date_key, local_today, CycleCounters, StatsAggregator, WeeklySummary, WEEK_DAYS};
pub use thumbnail::ThumbnailCache;
