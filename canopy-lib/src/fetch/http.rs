//! HTTP snapshot fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::Page;
use super::RetryConfig;
use super::SnapshotFetcher;
use crate::error::FetchError;
use crate::model::NodeData;
use crate::model::NodeId;

/// Configuration for [`HttpFetcher`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use canopy_lib::fetch::{HttpConfig, RetryConfig};
///
/// let config = HttpConfig::new("http://localhost:8080/api/")
///     .with_timeout(Duration::from_secs(5))
///     .with_retry(RetryConfig::no_retry());
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the tree API.
    pub base_url: String,
    /// Per-request timeout.
    ///
    /// Default: 30 seconds
    pub timeout: Option<Duration>,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl HttpConfig {
    /// Creates a config for the given base URL with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Some(Duration::from_secs(30)),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Fetches snapshots from a REST backend.
///
/// Endpoints, relative to the base URL (`{id}` is the `kind:key` form):
///
/// - `GET nodes/{id}/children?page=&page_size=` -> `{"items": [...], "total_count": n}`
/// - `GET nodes/{id}/parent` -> node or `null`
/// - `GET nodes/{id}/root-siblings?page=&page_size=` -> `{"items": [...], "total_count": n}`
///
/// HTTP 416 on a paged endpoint, and 404 on any page past the first, map
/// to [`FetchError::PageOutOfRange`]. Any other 404 is
/// [`FetchError::NotFound`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
    timeout: Option<Duration>,
    retry: RetryConfig,
}

impl HttpFetcher {
    /// Creates a fetcher from the given configuration.
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base, e)))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            timeout: config.timeout,
            retry: config.retry,
        })
    }

    /// Builds `nodes/{id}/{action}` with optional paging parameters.
    fn endpoint(
        &self,
        id: &NodeId,
        action: &str,
        paging: Option<(usize, usize)>,
    ) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("nodes")
            .push(&id.to_string())
            .push(action);
        if let Some((page, page_size)) = paging {
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("page_size", &page_size.to_string());
        }
        Ok(url)
    }

    /// Sends a GET request with retry, returning the parsed body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        target: &NodeId,
        page: Option<usize>,
    ) -> Result<T, FetchError> {
        let mut attempts = 0;
        let mut delay = self.retry.initial_delay;

        loop {
            match self.send(url.clone(), target, page).await {
                Ok(body) => {
                    return serde_json::from_str(&body)
                        .map_err(|e| FetchError::parse_with_body(e.to_string(), body));
                }
                Err(e) if e.is_retryable() && attempts < self.retry.max_retries => {
                    log::debug!("GET {} failed ({}), retrying in {:?}", url, e, delay);
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, url: Url, target: &NodeId, page: Option<usize>) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout.unwrap_or_default())
            } else {
                FetchError::Network(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }

        match (status, page) {
            (StatusCode::NOT_FOUND, Some(page)) if page > 1 => {
                Err(FetchError::PageOutOfRange { page })
            }
            (StatusCode::NOT_FOUND, _) => Err(FetchError::NotFound(target.clone())),
            (StatusCode::RANGE_NOT_SATISFIABLE, Some(page)) => {
                Err(FetchError::PageOutOfRange { page })
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(FetchError::http(status.as_u16(), body))
            }
        }
    }
}

/// Paged response body.
#[derive(Debug, Deserialize)]
struct PageBody {
    items: Vec<NodeData>,
    total_count: usize,
}

impl PageBody {
    fn into_page(self) -> Result<Page, FetchError> {
        if let Some(bad) = self.items.iter().find(|item| !item.is_consistent()) {
            return Err(FetchError::parse(format!(
                "node {} carries a payload of another kind",
                bad.id
            )));
        }
        Ok(Page::new(self.items, self.total_count))
    }
}

#[async_trait]
impl SnapshotFetcher for HttpFetcher {
    async fn fetch_children(
        &self,
        parent: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let url = self.endpoint(parent, "children", Some((page, page_size)))?;
        let body: PageBody = self.get_json(url, parent, Some(page)).await?;
        body.into_page()
    }

    async fn fetch_parent(&self, node: &NodeId) -> Result<Option<NodeData>, FetchError> {
        let url = self.endpoint(node, "parent", None)?;
        self.get_json(url, node, None).await
    }

    async fn fetch_root_siblings(
        &self,
        anchor: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let url = self.endpoint(anchor, "root-siblings", Some((page, page_size)))?;
        let body: PageBody = self.get_json(url, anchor, Some(page)).await?;
        body.into_page()
    }
}
