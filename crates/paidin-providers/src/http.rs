//! Shared REST plumbing
//!
//! Every adapter talks JSON (or form-encoded) REST to a configurable base
//! URL. Responses are classified here so that retry decisions are uniform:
//! transport failures, 429 and 5xx are transient; anything else is terminal.

use std::time::Duration;

use paidin_core::ProviderKind;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::{ProviderError, Result};

/// Per-request timeout for provider calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client bound to one provider's base URL
#[derive(Clone, Debug)]
pub struct ApiClient {
    provider: ProviderKind,
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(provider: ProviderKind, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("{provider} HTTP client: {e}")))?;

        Ok(Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub const fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Send and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider, &e))
    }

    /// Send and discard the body
    pub async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        self.send(request).await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(provider = %self.provider, status = status.as_u16(), "Provider call rejected");
        Err(ProviderError::from_status(self.provider, status.as_u16(), &body))
    }
}
