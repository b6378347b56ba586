//! Bookmark component backed by the host's HTTP API.
//!
//! Stands in for the host page's bookmark editor: it keeps the edit buffer
//! and thumbnail state locally and performs uploads and field edits with the
//! credentials of the session that created the bookmark.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::orchestrator::{
    BookmarkComponent, BookmarkField, ComponentLocator, EnrichJob, PendingEdit, ThumbnailChange,
    THUMBNAIL_WORN_SELF,
};

/// Request headers that carry the host session
const SESSION_HEADERS: [&str; 3] = ["cookie", "authorization", "x-csrftoken"];

/// Keep only the session-bearing headers of a request
pub fn session_headers<'a>(
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| {
            SESSION_HEADERS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name.as_str()))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[derive(Serialize)]
struct ThumbnailUpload<'a> {
    url: &'a str,
    image_url: &'a str,
    thumbnail_worn: &'a str,
}

pub struct HttpBookmarkComponent {
    client: Client,
    thumbnail_endpoint: String,
    field_edit_endpoint: String,
    session: Vec<(String, String)>,
    url: RwLock<Option<String>>,
    pending: RwLock<Option<PendingEdit>>,
    thumbnail: RwLock<Option<ThumbnailChange>>,
}

impl HttpBookmarkComponent {
    pub fn new(client: Client, config: &Config, session: Vec<(String, String)>) -> Self {
        Self {
            client,
            thumbnail_endpoint: format!("{}{}", config.api_base(), config.thumbnail_path),
            field_edit_endpoint: format!("{}{}", config.api_base(), config.field_edit_path),
            session,
            url: RwLock::new(None),
            pending: RwLock::new(None),
            thumbnail: RwLock::new(None),
        }
    }

    pub fn current_url(&self) -> Option<String> {
        self.url.read().clone()
    }

    pub fn thumbnail_state(&self) -> Option<ThumbnailChange> {
        self.thumbnail.read().clone()
    }

    fn with_session(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.session {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn submit(&self, request: RequestBuilder, what: &str) -> Result<()> {
        let response = self
            .with_session(request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} request failed: HTTP {} {}", what, status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl BookmarkComponent for HttpBookmarkComponent {
    async fn validate_url(&self, url: &str) -> Result<()> {
        *self.url.write() = Some(url.to_string());
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("Unsupported URL scheme: {}", parsed.scheme());
        }
        Ok(())
    }

    async fn upload_thumbnail(&self, url: &str, image_url: &str) -> Result<()> {
        debug!("Uploading thumbnail {} for {}", image_url, url);
        let request = self.client.post(&self.thumbnail_endpoint).json(&ThumbnailUpload {
            url,
            image_url,
            thumbnail_worn: THUMBNAIL_WORN_SELF,
        });
        self.submit(request, "thumbnail").await
    }

    fn commit_thumbnail(&self, change: ThumbnailChange) {
        *self.thumbnail.write() = Some(change);
    }

    fn pending_edit(&self) -> Option<PendingEdit> {
        self.pending.read().clone()
    }

    fn set_pending_edit(&self, edit: PendingEdit) {
        *self.pending.write() = Some(edit);
    }

    async fn edit_field(&self, field: BookmarkField) -> Result<()> {
        let edit = self
            .pending_edit()
            .context("No pending edit to submit")?;
        let value = match field {
            BookmarkField::Title => edit.title.clone(),
            BookmarkField::Description => edit.description.clone(),
        }
        .with_context(|| format!("Pending edit has no {}", field.as_str()))?;

        let mut body = Map::new();
        body.insert("pk".to_string(), Value::from(edit.pk));
        body.insert("url".to_string(), Value::from(edit.url.clone()));
        body.insert(field.as_str().to_string(), Value::from(value));

        debug!("Editing {} of bookmark {}", field.as_str(), edit.pk);
        let request = self.client.patch(&self.field_edit_endpoint).json(&body);
        self.submit(request, field.as_str()).await
    }
}

/// Builds an HTTP-backed component for each job, bound to the job's session.
pub struct HttpComponentLocator {
    client: Client,
    config: Arc<Config>,
}

impl HttpComponentLocator {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }
}

impl ComponentLocator for HttpComponentLocator {
    fn locate(&self, job: &EnrichJob) -> Option<Arc<dyn BookmarkComponent>> {
        Some(Arc::new(HttpBookmarkComponent::new(
            self.client.clone(),
            &self.config,
            job.session.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn component(server: &MockServer) -> HttpBookmarkComponent {
        let config = Config {
            upstream: server.base_url(),
            ..Default::default()
        };
        HttpBookmarkComponent::new(
            Client::new(),
            &config,
            vec![("cookie".to_string(), "sessionid=abc".to_string())],
        )
    }

    #[test]
    fn test_session_headers_filter() {
        let mut headers = HashMap::new();
        headers.insert("Cookie".to_string(), "sessionid=abc".to_string());
        headers.insert("X-CSRFToken".to_string(), "tok".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());

        let mut session = session_headers(&headers);
        session.sort();
        assert_eq!(
            session,
            vec![
                ("Cookie".to_string(), "sessionid=abc".to_string()),
                ("X-CSRFToken".to_string(), "tok".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_url() {
        let server = MockServer::start_async().await;
        let component = component(&server);
        assert!(component.validate_url("https://x").await.is_ok());
        assert_eq!(component.current_url().as_deref(), Some("https://x"));
        assert!(component.validate_url("not a url").await.is_err());
        assert!(component.validate_url("ftp://x/file").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_thumbnail_posts_with_session() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/edit-urlbookmark-thumb/")
                    .header("cookie", "sessionid=abc")
                    .json_body(json!({
                        "url": "https://x",
                        "image_url": "https://x/img.png",
                        "thumbnail_worn": "self"
                    }));
                then.status(200).json_body(json!({"ok": true}));
            })
            .await;

        component(&server)
            .upload_thumbnail("https://x", "https://x/img.png")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_edit_field_sends_only_that_field() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/edit-urlbookmark/")
                    .json_body(json!({"pk": 42, "url": "https://x", "description": "About x"}));
                then.status(200);
            })
            .await;

        let component = component(&server);
        component.set_pending_edit(PendingEdit {
            pk: 42,
            url: "https://x".to_string(),
            title: Some("X".to_string()),
            description: Some("About x".to_string()),
            ..Default::default()
        });
        component.edit_field(BookmarkField::Description).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_edit_failure_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/api/edit-urlbookmark/");
                then.status(403).body("CSRF failed");
            })
            .await;

        let component = component(&server);
        assert!(component.edit_field(BookmarkField::Title).await.is_err());

        component.set_pending_edit(PendingEdit {
            pk: 1,
            url: "https://x".to_string(),
            title: Some("T".to_string()),
            ..Default::default()
        });
        let err = component.edit_field(BookmarkField::Title).await.unwrap_err();
        assert!(err.to_string().contains("403"), "{}", err);
    }

    #[test]
    fn test_commit_thumbnail_updates_local_state() {
        let config = Config::default();
        let component = HttpBookmarkComponent::new(Client::new(), &config, Vec::new());
        assert_eq!(component.thumbnail_state(), None);
        component.commit_thumbnail(ThumbnailChange {
            thumbnail: "https://x/img.png".to_string(),
            thumbnail_worn: THUMBNAIL_WORN_SELF.to_string(),
        });
        assert_eq!(
            component.thumbnail_state().map(|c| c.thumbnail).as_deref(),
            Some("https://x/img.png")
        );
    }
}
