use thiserror::Error;

use crate::constants::BROWSER_USER_AGENT;
use crate::sink::SinkError;

/// Substitution token for the cleaned file title.
pub const TITLE_TOKEN: &str = "{title}";
/// Substitution token for the file size.
pub const SIZE_TOKEN: &str = "{size}";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to download {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("sink rejected document: {0}")]
    Sink(#[from] SinkError),
}

/// Download the file behind `url`.
///
/// # Errors
///
/// Returns [`DeliveryError::Fetch`] on transport failure or a non-success status.
pub async fn fetch_content(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, DeliveryError> {
    let fetch_err = |message: String| DeliveryError::Fetch {
        url: url.to_string(),
        message,
    };

    let response = client
        .get(url)
        .header("User-Agent", BROWSER_USER_AGENT)
        .send()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;

    if !response.status().is_success() {
        return Err(fetch_err(format!("HTTP {}", response.status())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Fill `{title}` and `{size}` into a caption template. Other braces are kept verbatim.
#[must_use]
pub fn render_caption(template: &str, title: &str, size: &str) -> String {
    let mut out = String::with_capacity(template.len() + title.len() + size.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(TITLE_TOKEN) {
            out.push_str(title);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(SIZE_TOKEN) {
            out.push_str(size);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Build the upload filename from a cleaned title.
#[must_use]
pub fn make_filename(title: &str, extension: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    let stem = if stem.is_empty() { "file".to_string() } else { stem };
    format!("{stem}.{extension}")
}
