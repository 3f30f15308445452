//! HTTP seam between the retrying fetcher and the network.

use std::fmt::Debug;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;

/// Status and fully read body of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Failure before a complete response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // The URL carries the API key.
        let err = err.without_url();
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl Transport for Client {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let res = Client::get(self, url.clone()).send().await?;

        let status = res.status().as_u16();
        let body = res.text().await?;

        Ok(RawResponse { status, body })
    }
}
