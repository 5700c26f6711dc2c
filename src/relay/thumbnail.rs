use tracing::{info, warn};

use super::delivery::fetch_content;

/// The shared thumbnail attached to every delivery.
///
/// Downloaded on first use and again only when the configured URL changes.
/// A failed download is not retried until [`ThumbnailCache::forget_failure`]
/// is called (once per cycle).
#[derive(Debug, Default)]
pub struct ThumbnailCache {
    url: Option<String>,
    bytes: Option<Vec<u8>>,
}

impl ThumbnailCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Thumbnail bytes for `url`, downloading them if the URL is new.
    pub async fn get(&mut self, client: &reqwest::Client, url: Option<&str>) -> Option<&[u8]> {
        let url = url?;

        if self.url.as_deref() != Some(url) {
            self.url = Some(url.to_string());
            self.bytes = match fetch_content(client, url).await {
                Ok(bytes) => {
                    info!(url = %url, size = bytes.len(), "Thumbnail downloaded");
                    Some(bytes)
                }
                Err(e) => {
                    warn!(url = %url, "Failed to download thumbnail: {e}");
                    None
                }
            };
        }

        self.bytes.as_deref()
    }

    /// Allow a failed download to be attempted again.
    pub fn forget_failure(&mut self) {
        if self.bytes.is_none() {
            self.url = None;
        }
    }
}
