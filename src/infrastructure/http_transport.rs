//! HTTP transport for backend requests
//!
//! The orchestrator talks to the network only through [`Transport`], so the
//! retry, proxy and pagination logic can be exercised with a scripted
//! transport. [`ReqwestTransport`] is the production implementation: one
//! pooled `reqwest::Client` per egress endpoint, created lazily.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::config::HarvestConfig;

/// Single GET request as issued by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Egress proxy URL; `None` means a direct request
    pub proxy: Option<String>,
}

/// Response with the body already read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid proxy '{0}'")]
    InvalidProxy(String),

    #[error("HTTP transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Configuration for the reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub follow_redirects: bool,
}

impl HttpClientConfig {
    #[must_use]
    pub fn from_harvest_config(config: &HarvestConfig) -> Self {
        Self {
            timeout: config.network.request_timeout(),
            user_agent: config.backend.user_agent.clone(),
            follow_redirects: true,
        }
    }
}

/// Production transport
pub struct ReqwestTransport {
    config: HttpClientConfig,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    pub fn new(config: HttpClientConfig) -> Result<Self, TransportError> {
        let direct = Self::builder(&config)?
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "🌐 HTTP transport ready (timeout: {:?}, redirects: {})",
            config.timeout, config.follow_redirects
        );
        Ok(Self {
            config,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn builder(config: &HttpClientConfig) -> Result<ClientBuilder, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        Ok(ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            }))
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self
            .proxied
            .lock()
            .map_err(|_| TransportError::Other("proxy client cache poisoned".into()))?;
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let reqwest_proxy =
            reqwest::Proxy::all(proxy).map_err(|_| TransportError::InvalidProxy(proxy.to_string()))?;
        let client = Self::builder(&self.config)?
            .proxy(reqwest_proxy)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create proxied client: {e}")))?;
        debug!("Created HTTP client for proxy {}", proxy);
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

fn map_reqwest_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

/// Seconds-form `Retry-After`; HTTP-date values are ignored
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(request.proxy.as_deref())?;

        debug!("🌐 HTTP GET {} (proxy: {:?})", request.url, request.proxy);
        let response = client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(|e| map_reqwest_error(&e))?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}
