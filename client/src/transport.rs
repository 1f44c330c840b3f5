//! Transport collaborator.
//!
//! The coordinator talks to the store through [`Transport`], so tests can
//! swap the network for an in-process store. [`HttpTransport`] is the reqwest
//! implementation used in production.

use crate::error::{Result, SyncError, TransportError};
use async_trait::async_trait;
use ferry_engine::ApiResponse;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

/// Query string pairs.
pub type Query = [(&'static str, String)];

/// Request/response access to the store.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        path: &str,
        query: &Query,
    ) -> std::result::Result<ApiResponse, TransportError>;

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<ApiResponse, TransportError>;

    async fn put(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<ApiResponse, TransportError>;
}

/// HTTP transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read(response: reqwest::Response) -> std::result::Result<ApiResponse, TransportError> {
        let status = response.status();
        let body = response.text().await?;

        // Error statuses still carry an envelope when the server produced them
        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) => Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        path: &str,
        query: &Query,
    ) -> std::result::Result<ApiResponse, TransportError> {
        let response = self.client.get(self.url(path)).query(query).send().await?;
        Self::read(response).await
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<ApiResponse, TransportError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read(response).await
    }

    async fn put(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<ApiResponse, TransportError> {
        let response = self.client.put(self.url(path)).json(body).send().await?;
        Self::read(response).await
    }
}

/// Bound a transport call by `timeout`.
pub async fn with_timeout<F>(timeout: Duration, call: F) -> Result<ApiResponse>
where
    F: Future<Output = std::result::Result<ApiResponse, TransportError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Timeout(timeout).into()),
    }
}

/// Unwrap the data of a successful envelope.
pub fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T> {
    if !response.success {
        let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(TransportError::Rejected(reason).into());
    }
    let data = response.data.ok_or(TransportError::MissingData)?;
    serde_json::from_value(data).map_err(SyncError::Decode)
}
