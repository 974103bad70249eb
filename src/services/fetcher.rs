//! Cache-or-network document resolution.
//!
//! A fetch goes through CacheCheck → Fetching → (RetryWait → Fetching)* → Done.
//! Transport failures, non-success statuses and pages the emptiness predicate
//! rejects are all retried after `retry_delay`, with no attempt limit. The
//! loop only ends on success or when the cancellation token fires, which is
//! how the run-wide deadline stops outstanding fetches.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::{FetchError, ScrapeError};
use crate::services::cache::{cache_key, DocumentCache};

/// Region checked by `RegionEmptiness::page_content`.
const PAGE_CONTENT_SELECTOR: &str = ".page-content";

/// Text the site shows instead of content during maintenance.
const UNAVAILABLE_MARKER: &str = "temporarily unavailable";

/// Decides whether a page served with a success status is actually empty
/// (maintenance page, truncated render) and must be fetched again.
pub trait EmptyPagePredicate: Send + Sync {
    fn is_empty(&self, page: &Html) -> bool;
}

/// Empty when the page has no visible text at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankBody;

impl EmptyPagePredicate for BlankBody {
    fn is_empty(&self, page: &Html) -> bool {
        page.root_element().text().all(|t| t.trim().is_empty())
    }
}

/// Empty when a content region is missing or blank, or contains one of the
/// given unavailability markers.
#[derive(Debug, Clone)]
pub struct RegionEmptiness {
    selector: Selector,
    unavailable_markers: Vec<String>,
}

impl RegionEmptiness {
    pub fn new(selector: &str, unavailable_markers: &[&str]) -> Result<Self, ScrapeError> {
        let selector = Selector::parse(selector).map_err(|e| {
            ScrapeError::Validation(format!("invalid selector '{}': {}", selector, e))
        })?;
        Ok(Self {
            selector,
            unavailable_markers: unavailable_markers.iter().map(|m| m.to_string()).collect(),
        })
    }

    /// The `.page-content` region and the site's maintenance message.
    pub fn page_content() -> Result<Self, ScrapeError> {
        Self::new(PAGE_CONTENT_SELECTOR, &[UNAVAILABLE_MARKER])
    }
}

impl EmptyPagePredicate for RegionEmptiness {
    fn is_empty(&self, page: &Html) -> bool {
        let Some(region) = page.select(&self.selector).next() else {
            return true;
        };
        let text: String = region.text().collect();
        text.trim().is_empty() || self.unavailable_markers.iter().any(|m| text.contains(m))
    }
}

/// Per-request parsing options.
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    /// Accept malformed markup silently. Strict fetches log how many parse
    /// errors the HTML parser had to recover from.
    pub relaxed: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self { relaxed: true }
    }
}

impl PageOptions {
    pub fn strict() -> Self {
        Self { relaxed: false }
    }
}

/// A fetched page. Holds the raw body; `html()` parses it on demand so the
/// document can cross task boundaries.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    url: Url,
    body: String,
    from_cache: bool,
}

impl ParsedDocument {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn html(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Shared page fetcher. One instance serves every task of a run.
#[derive(Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    cache: Option<Arc<dyn DocumentCache>>,
    skip_cache: bool,
    retry_delay: Duration,
    empty_page: Arc<dyn EmptyPagePredicate>,
    cancel: CancellationToken,
}

impl DocumentFetcher {
    pub fn new(client: reqwest::Client, retry_delay: Duration) -> Self {
        Self {
            client,
            cache: None,
            skip_cache: false,
            retry_delay,
            empty_page: Arc::new(BlankBody),
            cancel: CancellationToken::new(),
        }
    }

    /// HTTP client sending the configured User-Agent on every request.
    pub fn build_client(user_agent: &str) -> Result<reqwest::Client, ScrapeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ScrapeError::Validation(format!("Invalid User-Agent: {}", e)))?,
        );
        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ScrapeError::Validation(format!("Failed to build HTTP client: {}", e)))
    }

    /// Attach a cache. With `skip_cache`, cached bodies are never read but
    /// fetched pages still refresh the cache.
    pub fn with_cache(mut self, cache: Arc<dyn DocumentCache>, skip_cache: bool) -> Self {
        self.cache = Some(cache);
        self.skip_cache = skip_cache;
        self
    }

    pub fn with_empty_page_predicate(mut self, predicate: Arc<dyn EmptyPagePredicate>) -> Self {
        self.empty_page = predicate;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve `url` from the cache or the network, retrying until success
    /// or cancellation.
    pub async fn get_document(
        &self,
        url: &Url,
        options: PageOptions,
    ) -> Result<ParsedDocument, ScrapeError> {
        let key = cache_key(url);

        if let Some(cache) = self.readable_cache() {
            match cache.get(&key).await {
                Ok(Some(body)) => {
                    tracing::debug!("Fetcher: cache hit for {}", url);
                    return Ok(ParsedDocument {
                        url: url.clone(),
                        body,
                        from_cache: true,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Fetcher: cache read failed for {} ({}): {}", url, key, e);
                }
            }
        }

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            tracing::info!("Fetcher: fetching document {} (attempt {})", url, attempt);

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ScrapeError::Cancelled(url.to_string()));
                }
                outcome = self.fetch_once(url, options) => outcome,
            };

            match outcome {
                Ok(body) => {
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.put(&key, &body).await {
                            tracing::warn!("Fetcher: failed to cache {} ({}): {}", url, key, e);
                        }
                    }
                    return Ok(ParsedDocument {
                        url: url.clone(),
                        body,
                        from_cache: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Fetcher: attempt {} for {} failed: {}, retrying in {:?}",
                        attempt,
                        url,
                        e,
                        self.retry_delay
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ScrapeError::Cancelled(url.to_string()));
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// Drop the cached copy of `url`. No-op without a cache.
    pub async fn invalidate(&self, url: &Url) -> Result<(), ScrapeError> {
        if let Some(cache) = &self.cache {
            cache.delete(&cache_key(url)).await?;
        }
        Ok(())
    }

    fn readable_cache(&self) -> Option<&Arc<dyn DocumentCache>> {
        if self.skip_cache {
            None
        } else {
            self.cache.as_ref()
        }
    }

    /// One network attempt. Any error is retryable.
    async fn fetch_once(&self, url: &Url, options: PageOptions) -> Result<String, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response.text().await?;

        let empty = {
            let page = Html::parse_document(&body);
            if !options.relaxed && !page.errors.is_empty() {
                tracing::debug!(
                    "Fetcher: {} parsed with {} recovered markup errors",
                    url,
                    page.errors.len()
                );
            }
            self.empty_page.is_empty(&page)
        };
        if empty {
            return Err(FetchError::EmptyDocument);
        }

        Ok(body)
    }
}
