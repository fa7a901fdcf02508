//! HTTP client side of the peer protocol

use crate::common::tracing_middleware::{generate_request_id, REQUEST_ID_HEADER};
use crate::common::{encode_key, PeerError};
use crate::peer::PeerGetter;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use std::time::Duration;

/// Default per-request timeout for peer fetches
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(3);

/// Fetches values from one peer over HTTP
#[derive(Debug, Clone)]
pub struct HttpGetter {
    /// Peer URL joined with the base path, e.g. `http://10.0.0.2:8001/_cache`
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGetter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new(), DEFAULT_PEER_TIMEOUT)
    }

    /// Share a connection pool between getters
    pub fn with_client(
        base_url: impl Into<String>,
        client: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            timeout,
        }
    }

    /// `{base_url}/{group}/{key}`, both segments percent-encoded
    pub fn url_for(&self, group: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, encode_key(group), encode_key(key))
    }

    /// Fetch `key` of `group` from the peer. Anything but a 200 is an error.
    pub async fn fetch(&self, group: &str, key: &str) -> Result<Bytes, PeerError> {
        let url = self.url_for(group, key);

        let response = self
            .client
            .get(&url)
            .header(REQUEST_ID_HEADER, generate_request_id())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| PeerError::Decode(e.to_string()))
    }
}

impl PeerGetter for HttpGetter {
    fn get<'a>(&'a self, group: &'a str, key: &'a str) -> BoxFuture<'a, Result<Bytes, PeerError>> {
        Box::pin(self.fetch(group, key))
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}
