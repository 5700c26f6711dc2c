//! Validated writes to the runtime configuration record.
//!
//! Every change to `bot_config` goes through [`apply_setting`], which rejects
//! malformed input before touching the store.

use std::fmt;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::db::{get_bot_config, update_bot_config, BotConfig, Database};
use crate::relay::{SIZE_TOKEN, TITLE_TOKEN};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("value cannot be empty")]
    Empty,
    #[error("'{0}' is not a valid http(s) URL")]
    InvalidUrl(String),
    #[error("caption template must contain {0}")]
    MissingToken(&'static str),
    #[error("'{0}' is not a non-negative integer")]
    InvalidLimit(String),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Editable fields of the configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    BaseUrl,
    ThumbnailUrl,
    CaptionTemplate,
    TopicLimit,
}

impl ConfigField {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BaseUrl => "base URL",
            Self::ThumbnailUrl => "thumbnail URL",
            Self::CaptionTemplate => "caption template",
            Self::TopicLimit => "topic limit",
        }
    }

    /// What the operator is asked for when editing interactively.
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            Self::BaseUrl => "Send the new base URL (http or https).",
            Self::ThumbnailUrl => "Send the new thumbnail URL, or 'none' to disable the thumbnail.",
            Self::CaptionTemplate => {
                "Send the new caption template. It must contain {title} and {size}."
            }
            Self::TopicLimit => "Send the new topic limit (0 = unlimited).",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Check that a caption template carries both substitution tokens.
///
/// # Errors
///
/// Returns [`SettingsError::MissingToken`] naming the first absent token.
pub fn validate_caption_template(template: &str) -> Result<(), SettingsError> {
    if template.trim().is_empty() {
        return Err(SettingsError::Empty);
    }
    for token in [TITLE_TOKEN, SIZE_TOKEN] {
        if !template.contains(token) {
            return Err(SettingsError::MissingToken(token));
        }
    }
    Ok(())
}

fn validate_url(raw: &str) -> Result<String, SettingsError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SettingsError::Empty);
    }
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Ok(raw.to_string())
        }
        _ => Err(SettingsError::InvalidUrl(raw.to_string())),
    }
}

fn validate_limit(raw: &str) -> Result<i64, SettingsError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| SettingsError::InvalidLimit(raw.trim().to_string()))
}

/// Return `config` with `field` set from operator input, without persisting.
///
/// # Errors
///
/// Returns a validation error and leaves `config` untouched.
pub fn with_field(
    config: &BotConfig,
    field: ConfigField,
    raw: &str,
) -> Result<BotConfig, SettingsError> {
    let mut updated = config.clone();
    match field {
        ConfigField::BaseUrl => {
            updated.base_url = validate_url(raw)?.trim_end_matches('/').to_string();
        }
        ConfigField::ThumbnailUrl => {
            updated.thumbnail_url = if raw.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(validate_url(raw)?)
            };
        }
        ConfigField::CaptionTemplate => {
            validate_caption_template(raw)?;
            updated.caption_template = raw.to_string();
        }
        ConfigField::TopicLimit => {
            updated.topic_limit = validate_limit(raw)?;
        }
    }
    Ok(updated)
}

/// Validate and persist a single field change.
///
/// # Errors
///
/// Returns a validation error (store unchanged) or a persistence error.
pub async fn apply_setting(
    db: &Database,
    field: ConfigField,
    raw: &str,
    updated_by: Option<i64>,
) -> Result<BotConfig, SettingsError> {
    let current = get_bot_config(db.pool()).await?;
    let updated = with_field(&current, field, raw)?;
    update_bot_config(db.pool(), &updated, updated_by).await?;
    info!(field = %field, updated_by = ?updated_by, "Configuration updated");
    Ok(get_bot_config(db.pool()).await?)
}
