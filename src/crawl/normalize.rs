use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Placeholder returned when no size can be found in a label.
pub const UNKNOWN_SIZE: &str = "Unknown";

/// Decimal number followed by a unit that is not glued to another letter,
/// so bitrates such as `128kbps` are rejected but `2GB_HEVC` is not.
static SIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?\s*(?:GB|MB|KB))(?:[^a-z]|$)").unwrap());

/// Leading `www.site.tld - ` prefix. Captures the `www.` marker and the site
/// label.
static DOMAIN_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(www\.)?([a-z0-9-]+)\.[a-z]{2,}\s+-\s+").unwrap());

/// Reduce a file URL to its path, query and fragment.
///
/// Mirrors of the source site rotate domains, so the scheme and host carry no
/// identity. Relative links are returned as given.
#[must_use]
pub fn normalize_link(link: &str) -> String {
    let link = link.trim();
    match Url::parse(link) {
        Ok(parsed) if parsed.has_host() => {
            let mut normalized = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                normalized.push('?');
                normalized.push_str(query);
            }
            if let Some(fragment) = parsed.fragment() {
                normalized.push('#');
                normalized.push_str(fragment);
            }
            normalized
        }
        _ => link.to_string(),
    }
}

/// Find the first size token (e.g. `1.4GB`) in a label.
#[must_use]
pub fn extract_size(text: &str) -> String {
    SIZE_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| UNKNOWN_SIZE.to_string(), |m| m.as_str().to_string())
}

/// The site name of a link's host: `www.1tamilmv.blue` gives `1tamilmv`.
/// Mirrors rotate the TLD but keep this label. IP hosts have none.
fn site_label(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let host = url.domain()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut labels = host.rsplit('.');
    labels.next()?;
    labels.next().map(str::to_ascii_lowercase)
}

/// Strip the mirror-domain prefix and the trailing `.<extension>` from a label.
///
/// The prefix is removed when it starts with `www.` or its site name matches
/// the host of `link`, so dotted release names such as
/// `Mission.Impossible - ...` survive.
#[must_use]
pub fn clean_title(raw: &str, extension: &str, link: &str) -> String {
    let raw = raw.trim();
    let title = match DOMAIN_PREFIX.captures(raw) {
        Some(caps)
            if caps.get(1).is_some()
                || site_label(link).is_some_and(|site| caps[2].eq_ignore_ascii_case(&site)) =>
        {
            &raw[caps[0].len()..]
        }
        _ => raw,
    };
    let title = title.trim();

    let suffix_len = extension.len() + 1;
    let title = if title.len() > suffix_len
        && title.is_char_boundary(title.len() - suffix_len)
        && title[title.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{extension}"))
    {
        &title[..title.len() - suffix_len]
    } else {
        title
    };

    title.trim().to_string()
}
