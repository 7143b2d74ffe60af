//! HTTP fetch functionality

use crate::config::EngineConfig;
use crate::error::{ConfigError, FetchError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

/// Body of a streamed response
pub struct ChunkStream {
    /// Total body length from `Content-Length`, if the server sent one
    pub total: Option<u64>,
    /// Body chunks as they arrive from the network
    pub chunks: BoxStream<'static, Result<Bytes, FetchError>>,
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// A single GET, either buffered or streamed
///
/// Implementations never retry; every failure comes back as a [`FetchError`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the whole body of `url` with the given query parameters
    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes, FetchError>;

    /// Starts a GET and hands back the body as a stream
    async fn fetch_stream(&self, url: &str) -> Result<ChunkStream, FetchError>;
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a new HTTP fetcher
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            timeout: config.request_timeout(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::from(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes, FetchError> {
        debug!(%url, "fetching");

        // the timeout covers the body as well as the headers
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = check_status(response)?;
        response.bytes().await.map_err(|e| self.classify(e))
    }

    async fn fetch_stream(&self, url: &str) -> Result<ChunkStream, FetchError> {
        debug!(%url, "opening stream");

        // only the wait for headers is bounded here; body reads are bounded by the caller
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|e| self.classify(e))?;

        let response = check_status(response)?;
        let total = response.content_length();
        let chunks = response.bytes_stream().map_err(FetchError::from).boxed();

        Ok(ChunkStream { total, chunks })
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpFetcher::new(&EngineConfig::default()).unwrap();
        assert_eq!(fetcher.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let fetcher = HttpFetcher::new(&EngineConfig::default()).unwrap();
        let result = fetcher.fetch("not a url", &[]).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
