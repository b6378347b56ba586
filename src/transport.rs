//! Forwarding of calls to the real host API.
//!
//! [`Transport`] is the unwrapped network mechanism: anything the
//! interceptor does not answer itself ends up here unchanged.

use async_trait::async_trait;
use reqwest::header::ACCEPT_ENCODING;
use reqwest::{Client, Method};
use tracing::debug;

use crate::error::TransportError;

/// Headers that describe one connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "proxy-connection",
    "te",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Whether a caller's request header is passed upstream.
///
/// `accept-encoding` is withheld: bodies are inspected here and re-served
/// as they arrive, so upstream must answer uncompressed.
pub fn is_forwarded(name: &str) -> bool {
    !is_hop_by_hop(name) && !name.eq_ignore_ascii_case(ACCEPT_ENCODING.as_str())
}

/// A request as it leaves the interceptor
#[derive(Debug, Clone, Default)]
pub struct OutgoingRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// A completed upstream exchange
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport. Redirects are returned to the caller, not followed.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("method {}", request.method)))?;

        debug!("Forwarding {} {}", method, request.url);

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            if is_forwarded(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}
