//! Index provider reached over HTTP.
//!
//! Talks to the `/v0/provider/*` routes of another Sift instance. Failures
//! reported by the remote side arrive as `{code, message}` bodies and are
//! mapped back onto the same [`Error`] variant; transport failures become
//! [`Error::Unavailable`].

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sift_core::{Error, IndexSpaceRequest, Result, SearchIndexRequest, SearchIndexResponse};

use crate::provider::IndexProvider;

/// Path of the single-space search route.
pub const SEARCH_PATH: &str = "/v0/provider/search";

/// Path of the single-space reindex route.
pub const INDEX_PATH: &str = "/v0/provider/index";

/// Header carrying the shared token of instance-to-instance routes.
pub const INTERNAL_HEADER: &str = "x-sift-internal";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Remote index provider.
#[derive(Debug, Clone)]
pub struct RemoteIndexProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RemoteIndexProvider {
    /// Provider talking to `endpoint`, e.g. `http://10.0.0.7:9310`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Provider with a per-request timeout.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Send `token` in the [`INTERNAL_HEADER`] of every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL of the remote instance.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.endpoint);
        debug!("POST {url}");

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json");
        if let Some(token) = &self.token {
            request = request.header(INTERNAL_HEADER, token);
        }
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => Error::from_code(&body.code, body.message),
                Err(_) if status.is_server_error() => {
                    Error::unavailable(format!("{url} returned {status}: {text}"))
                }
                Err(_) => Error::internal(format!("{url} returned {status}: {text}")),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| Error::internal(format!("Failed to parse provider response: {e}")))
    }
}

#[async_trait]
impl IndexProvider for RemoteIndexProvider {
    async fn search(&self, request: SearchIndexRequest) -> Result<SearchIndexResponse> {
        let response = self.post(SEARCH_PATH, &request).await?;
        Self::decode(response).await
    }

    async fn index_space(&self, request: IndexSpaceRequest) -> Result<()> {
        self.post(INDEX_PATH, &request).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "remote"
    }
}
