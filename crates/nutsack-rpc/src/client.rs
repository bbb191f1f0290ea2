//! Base REST client for Cashu mint HTTP APIs.
//!
//! Provides `get()` and `post()` for JSON endpoints under the mint's base URL.
//! Supports configurable timeout and retry with exponential backoff on
//! transient failures.

use crate::error::RpcError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Error body returned by mints on 4xx responses.
#[derive(Deserialize)]
struct MintErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Configuration for an RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL (e.g., `https://mint.example.com`).
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retry attempts on transient failure.
    pub retries: u32,
    /// Initial delay between retries (doubles each attempt).
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3338".to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Async REST client for a single mint.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
}

impl RpcClient {
    /// Create a new client with the given URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Create a new client with full configuration.
    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = normalize_url(&config.url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the configured base URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// GET a JSON endpoint.
    pub async fn get(&self, endpoint: &str) -> Result<Value, RpcError> {
        self.request(Method::GET, endpoint, None).await
    }

    /// POST JSON to an endpoint.
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RpcError> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, endpoint);
        let label = format!("{} {}", method, endpoint);

        let attempts = self.config.retries + 1;
        let mut last_err = RpcError::NoResult {
            context: label.clone(),
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                log::debug!("retrying {} in {:?} (attempt {})", label, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.do_request(method.clone(), &url, body, &label).await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    let should_retry = e.is_transient() && attempt + 1 < attempts;
                    if !should_retry {
                        return Err(e);
                    }
                    log::warn!("{} failed: {}", label, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn do_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        label: &str,
    ) -> Result<Value, RpcError> {
        let mut req = self
            .client
            .request(method, url)
            .headers(self.build_headers());
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| RpcError::Http {
            method: label.to_string(),
            url: url.to_string(),
            source: e,
        })?;

        let status = resp.status().as_u16();

        if status >= 400 {
            let text = resp.text().await.unwrap_or_default();
            if let Ok(MintErrorBody {
                detail: Some(detail),
                code: Some(code),
            }) = serde_json::from_str::<MintErrorBody>(&text)
            {
                return Err(RpcError::Mint {
                    code,
                    detail,
                    method: label.to_string(),
                });
            }
            return Err(RpcError::HttpStatus {
                method: label.to_string(),
                url: url.to_string(),
                status,
                body: text.chars().take(500).collect(),
            });
        }

        resp.json().await.map_err(|e| RpcError::Http {
            method: label.to_string(),
            url: url.to_string(),
            source: e,
        })
    }
}

/// Canonical form of a mint URL: scheme required, no trailing slash.
pub fn normalize_url(url: &str) -> Result<String, RpcError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(RpcError::InvalidUrl(url.to_string()));
    }
    if trimmed.len() <= "https://".len() && trimmed.starts_with("https://")
        || trimmed.len() <= "http://".len()
    {
        return Err(RpcError::InvalidUrl(url.to_string()));
    }
    Ok(trimmed.to_string())
}
