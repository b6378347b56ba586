//! End-to-end tests: the proxy router in front of a mocked host API.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use bookmark_enricher::host::HttpComponentLocator;
use bookmark_enricher::server::{create_router, AppState};
use bookmark_enricher::{
    parse_document, Config, HttpTransport, MetadataExtractor, RequestInterceptor,
    UpdateOrchestrator,
};

const PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Example</title>
    <meta property="og:image" content="https://x/img.png">
    <meta name="description" content="An example page">
</head>
<body><img src="/logo.png" width="40" height="40"></body>
</html>"#;

fn config(server: &MockServer, settle_ms: u64) -> Arc<Config> {
    Arc::new(Config {
        upstream: server.base_url(),
        settle_ms,
        ..Default::default()
    })
}

fn router(config: Arc<Config>, with_enrichment: bool) -> axum::Router {
    let extractor = Arc::new(MetadataExtractor::new(&config).unwrap());
    let transport = Arc::new(HttpTransport::new().unwrap());
    let mut interceptor = RequestInterceptor::new(config.clone(), transport, extractor.clone());

    if with_enrichment {
        let locator = Arc::new(HttpComponentLocator::new(config.clone()).unwrap());
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            extractor,
            locator,
            config.settle_delay(),
        ));
        let (queue, _worker) = orchestrator.spawn();
        interceptor = interceptor.with_enrich_queue(queue);
    }

    create_router(AppState::new(Arc::new(interceptor), config))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_urldata_lookup_is_synthesized() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/page");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(PAGE_HTML);
        })
        .await;
    let host_lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/get-urldata/");
            then.status(200).json_body(json!({"urldata": {"title": "host"}}));
        })
        .await;

    let page_url = server.url("/page");
    let app = router(config(&server, 0), false);
    let request = Request::builder()
        .uri(format!("/api/get-urldata/?url={}", page_url))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = body_json(response).await;

    page.assert_async().await;
    assert_eq!(host_lookup.hits_async().await, 0);

    let object = body.as_object().unwrap();
    assert_eq!(object.len(), 1);
    let urldata = &body["urldata"];
    assert_eq!(urldata["url"], page_url.as_str());
    assert_eq!(urldata["thumbnail"], "https://x/img.png");
    assert_eq!(urldata["title"], "Example");
    assert_eq!(urldata["description"], "An example page");
    assert_eq!(urldata["is_webpage"], true);

    let expected = parse_document(&page_url, PAGE_HTML, String::new());
    assert_eq!(urldata["html_images"], serde_json::to_value(&expected.images).unwrap());
}

#[tokio::test]
async fn test_unknown_paths_are_forwarded_unchanged() {
    let server = MockServer::start_async().await;
    let upstream = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/collections/")
                .header("x-csrftoken", "tok")
                .body("{\"name\":\"reading\"}");
            then.status(201)
                .header("content-type", "application/json")
                .header("x-request-id", "abc")
                .body("{\"id\":7}");
        })
        .await;

    let app = router(config(&server, 0), false);
    let request = Request::builder()
        .method("POST")
        .uri("/api/collections/")
        .header("x-csrftoken", "tok")
        .body(Body::from("{\"name\":\"reading\"}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    upstream.assert_async().await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-request-id"], "abc");
    assert_eq!(body_json(response).await, json!({"id": 7}));
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let config = Arc::new(Config {
        upstream: "http://127.0.0.1:9".to_string(),
        ..Default::default()
    });
    let app = router(config, false);
    let request = Request::builder()
        .uri("/api/profile/")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_auth_requests_pass_through() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/login/");
            then.status(200).json_body(json!({"key": "token"}));
        })
        .await;

    let app = router(config(&server, 0), false);
    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login/")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    login.assert_async().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"key": "token"}));
}

#[tokio::test]
async fn test_saved_bookmark_is_enriched() {
    let server = MockServer::start_async().await;
    let page_url = server.url("/page");

    server
        .mock_async(|when, then| {
            when.method(GET).path("/page");
            then.status(200)
                .header("content-type", "text/html")
                .body(PAGE_HTML);
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/add-urlbookmark/")
                .header_missing("accept-encoding");
            then.status(200)
                .json_body(json!({"pk": 42, "url": page_url.clone(), "rating": 0}));
        })
        .await;
    let thumbnail = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/edit-urlbookmark-thumb/")
                .header("cookie", "sessionid=abc")
                .json_body(json!({
                    "url": page_url.clone(),
                    "image_url": "https://x/img.png",
                    "thumbnail_worn": "self"
                }));
            then.status(200);
        })
        .await;
    let title = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/api/edit-urlbookmark/")
                .json_body(json!({"pk": 42, "url": page_url.clone(), "title": "Example"}));
            then.status(200);
        })
        .await;
    let description = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/api/edit-urlbookmark/").json_body(json!({
                "pk": 42,
                "url": page_url.clone(),
                "description": "An example page"
            }));
            then.status(200);
        })
        .await;

    let app = router(config(&server, 20), true);
    let request = Request::builder()
        .method("POST")
        .uri("/api/add-urlbookmark/")
        .header("cookie", "sessionid=abc")
        .header("accept-encoding", "gzip, deflate, br")
        .header("content-type", "application/json")
        .body(Body::from(json!({"url": page_url.clone()}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["pk"], 42);
    create.assert_async().await;

    let mut waited = Duration::ZERO;
    while description.hits_async().await == 0 && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(25)).await;
        waited += Duration::from_millis(25);
    }

    thumbnail.assert_async().await;
    title.assert_async().await;
    description.assert_async().await;
}
