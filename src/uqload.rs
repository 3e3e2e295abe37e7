//! Metadata resolution for uqload video pages
//!
//! Resolution fetches the embed page and its non-embed twin in parallel,
//! scrapes the concatenated markup for the direct media URL, title, and
//! thumbnail, and probes the media URL with a single HEAD request for size
//! and content type. One failed page request fails the whole attempt.

use crate::error::{DownloadError, Result};
use crate::fetcher::{Fetcher, BROWSER_USER_AGENT, REQUEST_TIMEOUT};
use crate::util::{normalize_uqload_url, remove_special_characters};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

static MEDIA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://.+/v\.mp4").expect("invalid media url regex"));
static THUMBNAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://.*?\.jpg").expect("invalid thumbnail regex"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"title:\s*"(.*?)""#).expect("invalid title regex"));
static H1_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<h1[^>]*>(.*?)</h1>").expect("invalid h1 regex"));
static TEXTAREA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<textarea[^>]*>(.*?)</textarea>").expect("invalid textarea regex"));
static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+x\d+), ((?:\d+:)*\d+)\]").expect("invalid resolution regex"));

/// Everything known about a video once its page has been resolved.
///
/// Immutable after creation; produced by [`UqloadResolver`] and consumed by
/// a download task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub title: String,
    pub media_url: String,
    pub thumbnail_url: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub resolution: Option<String>,
    pub duration: Option<String>,
}

/// Metadata scraped from the page markup, before the media URL is probed.
#[derive(Debug, Clone, PartialEq)]
struct PageInfo {
    title: String,
    media_url: String,
    thumbnail_url: String,
    resolution: Option<String>,
    duration: Option<String>,
}

/// Resolves uqload page URLs into [`VideoDescriptor`]s.
pub struct UqloadResolver {
    fetcher: Fetcher,
}

impl UqloadResolver {
    pub fn new() -> Self {
        Self {
            fetcher: Fetcher::new(),
        }
    }

    pub fn with_fetcher(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Resolves a uqload page URL (or bare video id) into a descriptor.
    pub async fn resolve(&self, url: &str) -> Result<VideoDescriptor> {
        let page_url = normalize_uqload_url(url)?;
        self.resolve_page(&page_url).await
    }

    /// Resolves an already-normalized page URL.
    pub(crate) async fn resolve_page(&self, page_url: &str) -> Result<VideoDescriptor> {
        let urls = vec![page_url.to_string(), page_url.replace("embed-", "")];
        let pages = self.fetcher.fetch(&urls).await?;

        // One failed request invalidates the whole resolution attempt.
        if pages.iter().any(Option::is_none) {
            return Err(DownloadError::IncompleteBatch);
        }

        let html = pages
            .into_iter()
            .flatten()
            .map(|page| page.body)
            .collect::<Vec<_>>()
            .join("\n");

        let info = extract_page_info(&html)?;
        debug!(media_url = %info.media_url, "extracted media url");

        let (size_bytes, content_type) = self.probe_media(&info.media_url).await?;

        Ok(VideoDescriptor {
            title: info.title,
            media_url: info.media_url,
            thumbnail_url: info.thumbnail_url,
            size_bytes,
            content_type,
            resolution: info.resolution,
            duration: info.duration,
        })
    }

    /// Single HEAD request against the media URL for size and content type.
    async fn probe_media(&self, media_url: &str) -> Result<(u64, String)> {
        let referer = referer_for(media_url);
        let response = self
            .fetcher
            .client()
            .head(media_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(reqwest::header::REFERER, referer)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let size_bytes = header_value(&response, reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let content_type =
            header_value(&response, reqwest::header::CONTENT_TYPE).unwrap_or_default();

        Ok((size_bytes, content_type))
    }
}

impl Default for UqloadResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Builds a `scheme://host[:port]` Referer for the given URL.
pub(crate) fn referer_for(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut referer = format!(
                "{}://{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            );
            if let Some(port) = parsed.port() {
                referer.push_str(&format!(":{port}"));
            }
            referer
        }
        Err(_) => String::new(),
    }
}

/// Scrapes the concatenated page markup for video metadata.
fn extract_page_info(html: &str) -> Result<PageInfo> {
    let lowered = html.to_lowercase();
    if lowered.contains("file was deleted") || lowered.contains("file not found") {
        return Err(DownloadError::VideoNotFound);
    }

    let media_url = MEDIA_URL_RE
        .find(html)
        .map(|m| m.as_str().to_string())
        .ok_or(DownloadError::VideoNotFound)?;
    let thumbnail_url = THUMBNAIL_RE
        .find(html)
        .map(|m| m.as_str().to_string())
        .ok_or(DownloadError::VideoNotFound)?;
    let mut title = TITLE_RE
        .captures(html)
        .map(|caps| remove_special_characters(&caps[1]))
        .ok_or(DownloadError::VideoNotFound)?;

    // The page heading, when present, carries a cleaner title than the
    // player config.
    if let Some(caps) = H1_RE.captures(html) {
        let heading = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
        if !heading.is_empty() {
            title = remove_special_characters(&heading);
        }
    }

    let mut resolution = None;
    let mut duration = None;
    for caps in TEXTAREA_RE.captures_iter(html) {
        if let Some(matched) = RESOLUTION_RE.captures(&caps[1]) {
            resolution = Some(matched[1].to_string());
            duration = Some(matched[2].to_string());
            break;
        }
    }

    Ok(PageInfo {
        title,
        media_url,
        thumbnail_url,
        resolution,
        duration,
    })
}
