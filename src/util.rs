//! Small helpers: uqload URL validation, filename sanitization, size formatting

use crate::error::{DownloadError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static UQLOAD_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(www\.)?uqload\.[a-z]+/(embed-)?[a-zA-Z0-9]{12}\.html$")
        .expect("invalid uqload url regex")
});

static SPECIAL_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*.]"#).expect("invalid special chars regex"));

/// Checks whether the provided URL is a fully-formed uqload video page URL.
pub fn is_uqload_url(url: &str) -> bool {
    UQLOAD_URL_RE.is_match(url)
}

/// Normalizes user input into a canonical uqload embed page URL.
///
/// Accepts a full page URL or a bare 12-character video id, adding the
/// `https://uqload.to` base, the `embed-` prefix, and the `.html` suffix as
/// needed. Fails with [`DownloadError::InvalidUqloadUrl`] when the result
/// does not match the expected page URL shape.
pub fn normalize_uqload_url(url: &str) -> Result<String> {
    if url.len() < 12 {
        return Err(DownloadError::InvalidUqloadUrl);
    }

    let (base_url, video_id) = match url.rsplit_once('/') {
        Some((base, id)) => (base.to_string(), id.to_string()),
        None => ("https://uqload.to".to_string(), url.to_string()),
    };

    let video_id = if video_id.contains(".html") {
        video_id
    } else {
        format!("{video_id}.html")
    };
    let video_id = if video_id.contains("embed-") {
        video_id
    } else {
        format!("embed-{video_id}")
    };

    let full_url = format!("{base_url}/{video_id}");
    if !is_uqload_url(&full_url) {
        return Err(DownloadError::InvalidUqloadUrl);
    }
    Ok(full_url)
}

/// Replaces filesystem-hostile characters with spaces and collapses runs of
/// whitespace. A string made only of special characters comes back empty.
pub fn remove_special_characters(input: &str) -> String {
    let cleaned = SPECIAL_CHARS_RE.replace_all(input, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Formats a byte count as a human-readable string, e.g. `"10.5 KB"`.
pub fn convert_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let index = ((size_bytes as f64).log(1024.0).floor() as usize).min(UNITS.len() - 1);
    let base = 1024u64.pow(index as u32);
    let size = (size_bytes as f64 / base as f64 * 100.0).round() / 100.0;
    format!("{} {}", size, UNITS[index])
}
