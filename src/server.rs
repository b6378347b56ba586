//! Proxy front end for the host API.
//!
//! Every inbound request becomes a [`NetworkCall`] driven through the
//! [`RequestInterceptor`]; the call's final state is served back. Auth and
//! login requests take the page-level fetch path instead.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::call::NetworkCall;
use crate::config::Config;
use crate::interceptor::{is_auth_url, RequestInterceptor};
use crate::transport::{is_hop_by_hop, OutgoingRequest};

/// Shared proxy state
pub struct AppState {
    pub interceptor: Arc<RequestInterceptor>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(interceptor: Arc<RequestInterceptor>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            interceptor,
            config,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the proxy until `shutdown` resolves
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let router = create_router(state.clone());

    info!(
        "Proxy running at http://{} (upstream {})",
        addr,
        state.config.api_base()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("{}{}", state.config.api_base(), path);
    let headers: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = (!body.is_empty()).then(|| body.to_vec());

    if is_auth_url(path) {
        let request = OutgoingRequest {
            method: method.to_string(),
            url,
            headers,
            body,
        };
        return match state.interceptor.fetch(request).await {
            Ok(response) => build_response(response.status, &response.headers, response.body),
            Err(e) => {
                error!("Upstream fetch failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
        };
    }

    let call = NetworkCall::new();
    let done = call.completion();
    state.interceptor.open(&call, method.as_str(), &url);
    for (name, value) in &headers {
        state.interceptor.set_request_header(&call, name, value);
    }
    state.interceptor.send(&call, body).await;

    if done.await.is_err() {
        error!("{} never completed", call.id());
        return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
    }
    if call.status() == 0 {
        return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
    }

    build_response(
        call.status(),
        &call.response_header_pairs(),
        call.response_body(),
    )
}

fn build_response(status: u16, headers: &[(String, String)], body: Vec<u8>) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    match builder.body(Body::from(body)) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_response_drops_hop_by_hop_headers() {
        let response = build_response(
            201,
            &[
                ("content-type".to_string(), "application/json".to_string()),
                ("transfer-encoding".to_string(), "chunked".to_string()),
            ],
            b"{}".to_vec(),
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert!(response.headers().get("transfer-encoding").is_none());
    }

    #[test]
    fn test_invalid_status_is_internal_error() {
        let response = build_response(42, &[], Vec::new());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
