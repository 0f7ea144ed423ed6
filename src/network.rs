//! Network layer abstraction for testability.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, HOST, HeaderMap};

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::request::{Request, Response, is_hop_by_hop};

/// Performs live network requests.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetches `request` from the network.
    ///
    /// A non-2xx status is a successful fetch; only transport failures are
    /// errors.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default network implementation using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Builds an HTTP client from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30));
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Headers to send upstream. `Host` and `Content-Length` are derived from the
/// URL and body by the client.
fn outgoing_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && **name != HOST && **name != CONTENT_LENGTH)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        log::debug!("Network fetch: {request}");
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(outgoing_headers(request.headers()));
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }
        let resp = builder.send().await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
