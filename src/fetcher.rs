//! Fan-out page fetcher
//!
//! Issues one GET per URL concurrently and returns the results in input
//! order, regardless of the order in which the requests finish. A request
//! that fails or answers with a non-200 status is represented as `None` at
//! its input position; callers decide whether a partial batch is usable
//! (the resolver treats any `None` as a failure of the whole batch).

use crate::error::{DownloadError, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// User-Agent header sent with every outbound request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

/// Timeout applied to every metadata request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after any redirects the client followed.
    pub url: String,
    /// Response body decoded as text.
    pub body: String,
}

/// Concurrent page fetcher backed by a shared HTTP client.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches all URLs concurrently.
    ///
    /// Spawns one task per URL, waits for every task to finish, and returns
    /// the responses sorted by input index, so position `i` of the result
    /// always corresponds to position `i` of the input. No retries are
    /// performed; retry policy belongs to the caller.
    pub async fn fetch(&self, urls: &[String]) -> Result<Vec<Option<FetchedPage>>> {
        if urls.is_empty() {
            return Err(DownloadError::invalid_input("urls must be a non-empty list"));
        }

        let mut handles = Vec::with_capacity(urls.len());
        for (idx, url) in urls.iter().cloned().enumerate() {
            let client = self.client.clone();
            handles.push((idx, tokio::spawn(async move { fetch_one(&client, &url).await })));
        }

        let mut responses = Vec::with_capacity(urls.len());
        for (idx, handle) in handles {
            responses.push((idx, handle.await.unwrap_or(None)));
        }

        responses.sort_by_key(|(idx, _)| *idx);
        Ok(responses.into_iter().map(|(_, page)| page).collect())
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Option<FetchedPage> {
    let response = match client
        .get(url)
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            debug!(url, %err, "page request failed");
            return None;
        }
    };

    if response.status() != StatusCode::OK {
        debug!(url, status = %response.status(), "non-200 page response");
        return None;
    }

    let final_url = response.url().to_string();
    match response.text().await {
        Ok(body) => Some(FetchedPage {
            url: final_url,
            body,
        }),
        Err(err) => {
            debug!(url, %err, "failed to read page body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::io::Write;

    #[tokio::test]
    async fn test_empty_url_list_is_rejected() {
        let fetcher = Fetcher::new();
        let result = fetcher.fetch(&[]).await;
        assert!(matches!(result, Err(DownloadError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_results_keep_input_order_despite_completion_order() {
        let mut server = Server::new_async().await;

        // The first URL answers slowly so the second request finishes first.
        let slow = server
            .mock("GET", "/slow")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(300));
                w.write_all(b"slow body")
            })
            .create();
        let fast = server
            .mock("GET", "/fast")
            .with_status(200)
            .with_body("fast body")
            .create();

        let fetcher = Fetcher::new();
        let urls = vec![
            format!("{}/slow", server.url()),
            format!("{}/fast", server.url()),
        ];
        let results = fetcher.fetch(&urls).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().body, "slow body");
        assert_eq!(results[1].as_ref().unwrap().body, "fast body");

        slow.assert();
        fast.assert();
    }

    #[tokio::test]
    async fn test_non_200_yields_none_at_its_position() {
        let mut server = Server::new_async().await;

        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body("page")
            .expect_at_least(2)
            .create();
        let missing = server.mock("GET", "/missing").with_status(404).create();

        let fetcher = Fetcher::new();
        let urls = vec![
            format!("{}/ok", server.url()),
            format!("{}/missing", server.url()),
            format!("{}/ok", server.url()),
        ];
        let results = fetcher.fetch(&urls).await.unwrap();

        assert_eq!(results.len(), urls.len());
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());

        ok.assert();
        missing.assert();
    }

    #[tokio::test]
    async fn test_unreachable_host_yields_none() {
        let fetcher = Fetcher::new();
        let urls = vec!["http://127.0.0.1:1/nothing".to_string()];
        let results = fetcher.fetch(&urls).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_none());
    }
}
