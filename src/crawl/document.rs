//! HTML parsing for the listing page and individual threads.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use super::normalize::{clean_title, extract_size, normalize_link};

/// Path fragment identifying forum thread links.
const THREAD_PATH: &str = "/forums/topic/";
/// Fallback used by site layouts without the `/forums` prefix.
const THREAD_PATH_FALLBACK: &str = "/topic/";

/// A downloadable file found in a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedFile {
    /// Absolute URL as published, host included.
    pub link: String,
    /// Host-independent identity of the file.
    pub normalized_link: String,
    /// Anchor label before any cleaning.
    pub raw_title: String,
    /// Size token from the label, or `"Unknown"`.
    pub size: String,
}

/// A thread and the files currently attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedTopic {
    pub topic_url: String,
    pub title: String,
    pub files: Vec<ScrapedFile>,
}

/// Collect thread URLs from the listing page, deduplicated in page order.
#[must_use]
pub fn parse_listing(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("Invalid selector");

    let hrefs: Vec<&str> = document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .collect();

    let mut matching: Vec<&str> = hrefs
        .iter()
        .copied()
        .filter(|href| href.contains(THREAD_PATH))
        .collect();
    if matching.is_empty() {
        matching = hrefs
            .iter()
            .copied()
            .filter(|href| href.contains(THREAD_PATH_FALLBACK))
            .collect();
    }

    let mut seen = HashSet::new();
    matching
        .into_iter()
        .filter_map(|href| base.join(href).ok())
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Extract the file anchors of a thread.
///
/// Anchors are matched on `data-fileext` equal to `extension` (ASCII
/// case-insensitive). Files repeating an already collected normalized link
/// are dropped.
#[must_use]
pub fn parse_thread(html: &str, thread_url: &Url, extension: &str) -> ScrapedTopic {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[data-fileext][href]").expect("Invalid selector");
    let title_selector = Selector::parse("title").expect("Invalid selector");

    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for anchor in document.select(&anchor_selector) {
        let element = anchor.value();
        let is_file = element
            .attr("data-fileext")
            .is_some_and(|ext| ext.trim().eq_ignore_ascii_case(extension));
        if !is_file {
            continue;
        }

        let href = element.attr("href").unwrap_or_default().trim();
        if href.is_empty() {
            continue;
        }
        let Ok(link) = thread_url.join(href) else {
            continue;
        };
        let link = String::from(link);
        let normalized_link = normalize_link(&link);
        if !seen.insert(normalized_link.clone()) {
            continue;
        }

        let raw_title = anchor
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let size = extract_size(&raw_title);

        files.push(ScrapedFile {
            link,
            normalized_link,
            raw_title,
            size,
        });
    }

    let page_title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let title = page_title
        .or_else(|| files.first().map(|f| clean_title(&f.raw_title, extension, &f.link)))
        .unwrap_or_else(|| thread_url.to_string());

    ScrapedTopic {
        topic_url: thread_url.to_string(),
        title,
        files,
    }
}
