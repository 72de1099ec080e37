//! HTTP fetching with an in-memory request cache.
//!
//! Every provider request goes through [`Fetcher`], which checks the
//! [`RequestCache`] before touching the network and stores the body on a
//! miss. Requests carry a fixed timeout and are never retried.

pub mod cache;

pub use cache::RequestCache;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Errors that can occur during fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Reading JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected payload: {0}")]
    Payload(String),

    #[error("Request cache capacity must be positive, got {0}")]
    InvalidCacheCapacity(usize),
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Request timeout
    pub timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Number of responses kept in the request cache
    pub cache_capacity: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: concat!("sports-pool/", env!("CARGO_PKG_VERSION")).to_string(),
            cache_capacity: 128,
        }
    }
}

/// Raw HTTP GET returning the response body.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// [`HttpGet`] backed by a reqwest client.
pub struct ReqwestGet {
    client: Client,
}

impl ReqwestGet {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("sports-pool")),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpGet for ReqwestGet {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        info!("Requesting {}", url);

        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Cached HTTP GET shared by every provider adapter.
pub struct Fetcher {
    http: Arc<dyn HttpGet>,
    cache: Arc<RequestCache>,
}

impl Fetcher {
    /// Create a fetcher that talks to the network through reqwest.
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let http = Arc::new(ReqwestGet::new(config)?);
        let cache = Arc::new(RequestCache::new(config.cache_capacity)?);
        Ok(Self::with_client(http, cache))
    }

    pub fn with_client(http: Arc<dyn HttpGet>, cache: Arc<RequestCache>) -> Self {
        Self { http, cache }
    }

    pub fn cache(&self) -> &Arc<RequestCache> {
        &self.cache
    }

    /// Fetch a URL, serving it from the request cache when present.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        if let Some(body) = self.cache.get(url.as_str()) {
            debug!("Serving {} from request cache", url);
            return Ok(body);
        }

        let body = self.http.get(url).await?;
        self.cache.add(url.as_str(), body.clone());
        Ok(body)
    }

    /// Fetch a URL and decode its JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let body = self.fetch(url).await?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Json {
            url: url.to_string(),
            source,
        })
    }
}

/// Parse a URL, mapping failures to [`FetchError::InvalidUrl`].
pub fn parse_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))
}

/// Canned [`HttpGet`] for tests and offline runs.
///
/// Each registered pattern is matched as a substring of the requested URL;
/// the first match wins. Unmatched URLs answer 404.
#[derive(Default)]
pub struct StubHttp {
    responses: Vec<(String, Result<Vec<u8>, u16>)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, pattern: &str, body: &str) -> Self {
        self.responses
            .push((pattern.to_string(), Ok(body.as_bytes().to_vec())));
        self
    }

    pub fn with_status(mut self, pattern: &str, status: u16) -> Self {
        self.responses.push((pattern.to_string(), Err(status)));
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpGet for StubHttp {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let matched = self
            .responses
            .iter()
            .find(|(pattern, _)| url.as_str().contains(pattern.as_str()));
        match matched {
            Some((_, Ok(body))) => Ok(body.clone()),
            Some((_, Err(status))) => Err(FetchError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}
