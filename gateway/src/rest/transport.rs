//! The one trait seam in the REST stack: everything above this boundary — signing, rate
//! limiting, breaker, caching, classification — is exercised against a fake transport in tests;
//! only this trait's production impl touches a real socket.

use async_trait::async_trait;
use hyper::{Body, Client, Method, Request};
use hyper_rustls::HttpsConnectorBuilder;

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("transport error sending {method} {uri}: {source}")]
pub struct TransportError {
    pub method: String,
    pub uri: String,
    #[source]
    pub source: anyhow::Error,
}

/// Sends one HTTP request and returns the raw status/body. Implementations never interpret the
/// body — classification happens above this boundary in `ErrorTaxonomy`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        uri: String,
        body: Option<String>,
        headers: Vec<(String, String)>,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport backed by a single long-lived, pooled `hyper` client over TLS, reused
/// across every request rather than built per call.
pub struct HyperTransport {
    client: Client<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>,
}

impl HyperTransport {
    pub fn new(pool_size: usize) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .build(https);
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(
        &self,
        method: Method,
        uri: String,
        body: Option<String>,
        headers: Vec<(String, String)>,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = Request::builder().method(method.clone()).uri(&uri);
        for (key, value) in &headers {
            builder = builder.header(key, value);
        }
        let body = match body {
            Some(body) => Body::from(body),
            None => Body::empty(),
        };
        let request = builder.body(body).map_err(|err| TransportError {
            method: method.to_string(),
            uri: uri.clone(),
            source: err.into(),
        })?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|err| TransportError {
                method: method.to_string(),
                uri: uri.clone(),
                source: err.into(),
            })?;

        let status = response.status().as_u16();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| TransportError {
                method: method.to_string(),
                uri: uri.clone(),
                source: err.into(),
            })?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(RawResponse { status, body })
    }
}
