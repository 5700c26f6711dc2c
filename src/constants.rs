//! Shared constants used across the application.

/// User agent string used for requests to the source site.
///
/// The source sits behind bot protection that rejects obvious non-browser
/// clients, so requests present themselves as a desktop browser.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Seed value for `bot_config.base_url` on first boot.
pub const DEFAULT_BASE_URL: &str = "https://www.1tamilmv.blue";

/// Seed value for `bot_config.thumbnail_url` on first boot.
pub const DEFAULT_THUMBNAIL_URL: &str =
    "https://pbs.twimg.com/profile_images/1672203006232924161/B6aInkS9_400x400.jpg";

/// Seed value for `bot_config.caption_template` on first boot.
pub const DEFAULT_CAPTION_TEMPLATE: &str =
    "{title}\n\n\u{1f4e6} {size}\n\n#1TamilMV | #TamilMV | #TMV";

/// Seed value for `bot_config.topic_limit` on first boot (0 = unlimited).
pub const DEFAULT_TOPIC_LIMIT: i64 = 0;

/// Telegram rejects messages longer than 4096 characters; stay below it.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Exit status used after an operator-requested restart.
pub const RESTART_EXIT_CODE: i32 = 75;
