//! Retrieval of externally referenced resources (engine scripts, block
//! contents, input files).

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::error::FetchError;

/// Something that can turn a URL into text.
///
/// Implementations can hit the network, read a pre-populated table, or
/// layer caching on top of another fetcher.
pub trait ResourceFetcher: Send + Sync {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        (**self).fetch_text(url)
    }
}

/// Fetches over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            tracing::debug!(%url, "fetching resource");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::new(url, e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::new(url, status.to_string()).with_status(status.as_u16()));
            }
            response
                .text()
                .await
                .map_err(|e| FetchError::new(url, e.to_string()))
        })
    }
}

/// In-memory resource table.
///
/// Used for offline rendering and tests; also counts requests per URL.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: DashMap<String, String>,
    requests: DashMap<String, usize>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(url, content);
        self
    }

    pub fn insert(&self, url: impl Into<String>, content: impl Into<String>) {
        self.resources.insert(url.into(), content.into());
    }

    /// How many times `url` has been requested, hits and misses alike.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.get(url).map(|count| *count).unwrap_or(0)
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        *self.requests.entry(url.to_owned()).or_insert(0) += 1;
        let result = self
            .resources
            .get(url)
            .map(|content| content.value().clone())
            .ok_or_else(|| FetchError::new(url, "not found").with_status(404));
        Box::pin(async move { result })
    }
}
