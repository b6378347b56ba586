//! Classification and interception of outgoing host calls.
//!
//! Every call is opened through the interceptor, which keeps a small record
//! per call identity until the call completes. On send the call is
//! classified by path and method:
//!
//! - metadata lookups are answered locally with extracted page metadata
//! - bookmark creations go out unchanged and, on success, queue enrichment
//! - bookmark edits go out unchanged with their headers captured, and the
//!   last successful one is kept for diagnostics
//! - everything else is forwarded untouched
//!
//! Any failure on the interception side falls back to forwarding the call.

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::call::{CallEvent, CallId, NetworkCall};
use crate::config::Config;
use crate::error::TransportError;
use crate::host::session_headers;
use crate::metadata::{MetadataRecord, MetadataSource};
use crate::orchestrator::{CreatedBookmark, EnrichJob, EnrichQueue};
use crate::synthesizer::synthesize;
use crate::transport::{OutgoingRequest, Transport, TransportResponse};

/// What the interceptor knows about one in-flight call
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedCall {
    pub target_url: String,
    pub method: String,
    /// Whether the call matched a known pattern
    pub recognized: bool,
    /// Request headers, tracked once the call is recognized
    pub captured_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    PassThrough,
    MetadataLookup,
    BookmarkCreate,
    FieldEdit,
}

#[derive(Serialize)]
struct UrlDataResponse<'a> {
    urldata: &'a MetadataRecord,
}

/// Request/response of a successful bookmark edit
#[derive(Debug, Clone, Serialize)]
pub struct EditSnapshot {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub response: String,
    pub captured_at: DateTime<Utc>,
}

/// Diagnostic state kept for the lifetime of one interceptor session.
#[derive(Debug, Default)]
pub struct EditDiagnostics {
    last: RwLock<Option<EditSnapshot>>,
}

impl EditDiagnostics {
    pub fn record(&self, snapshot: EditSnapshot) {
        *self.last.write() = Some(snapshot);
    }

    pub fn last(&self) -> Option<EditSnapshot> {
        self.last.read().clone()
    }

    pub fn reset(&self) {
        *self.last.write() = None;
    }
}

/// URLs the page-level fetch path reports on
pub fn is_auth_url(url: &str) -> bool {
    url.contains("auth") || url.contains("login")
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

type CallTable = Arc<Mutex<HashMap<CallId, InterceptedCall>>>;

/// Drops a call's record when `send` ends, including when the send future
/// itself is dropped before completion.
struct TrackedCall<'a> {
    calls: &'a Mutex<HashMap<CallId, InterceptedCall>>,
    id: CallId,
}

impl Drop for TrackedCall<'_> {
    fn drop(&mut self) {
        self.calls.lock().remove(&self.id);
    }
}

pub struct RequestInterceptor {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    extractor: Arc<dyn MetadataSource>,
    enrich_queue: Option<EnrichQueue>,
    calls: CallTable,
    diagnostics: Arc<EditDiagnostics>,
}

impl RequestInterceptor {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        extractor: Arc<dyn MetadataSource>,
    ) -> Self {
        Self {
            config,
            transport,
            extractor,
            enrich_queue: None,
            calls: Arc::new(Mutex::new(HashMap::new())),
            diagnostics: Arc::new(EditDiagnostics::default()),
        }
    }

    /// Hand successful bookmark creations to `queue`
    pub fn with_enrich_queue(mut self, queue: EnrichQueue) -> Self {
        self.enrich_queue = Some(queue);
        self
    }

    pub fn diagnostics(&self) -> &EditDiagnostics {
        &self.diagnostics
    }

    /// Record of a call that is still in flight
    pub fn tracked(&self, id: CallId) -> Option<InterceptedCall> {
        self.calls.lock().get(&id).cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn open(&self, call: &NetworkCall, method: &str, url: &str) {
        call.open(method, url);
        debug!(
            "{} opened: {} {} (bookmark: {}, auth: {})",
            call.id(),
            call.method(),
            url,
            url.contains(self.config.bookmark_marker.as_str()),
            is_auth_url(url)
        );
        self.calls.lock().insert(
            call.id(),
            InterceptedCall {
                target_url: url.to_string(),
                method: call.method(),
                recognized: false,
                captured_headers: None,
            },
        );
    }

    /// Set a request header, capturing it when the call is being tracked.
    pub fn set_request_header(&self, call: &NetworkCall, name: &str, value: &str) {
        call.set_request_header(name, value);
        let mut calls = self.calls.lock();
        if let Some(captured) = calls
            .get_mut(&call.id())
            .and_then(|record| record.captured_headers.as_mut())
        {
            // Repeated names are combined on the call, so copy its view
            *captured = call.request_headers().into_iter().collect();
        }
    }

    fn resolve(&self, url: &str) -> Result<Url, url::ParseError> {
        match Url::parse(url) {
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(self.config.api_base())?.join(url)
            }
            other => other,
        }
    }

    pub fn classify(&self, method: &str, url: &str) -> Result<CallKind, url::ParseError> {
        let parsed = self.resolve(url)?;
        let path = parsed.path();
        let is_update = method.eq_ignore_ascii_case("PATCH") || method.eq_ignore_ascii_case("PUT");

        let kind = if path == self.config.urldata_path {
            CallKind::MetadataLookup
        } else if path == self.config.add_bookmark_path {
            CallKind::BookmarkCreate
        } else if path.contains(self.config.edit_marker.as_str())
            || (is_update && path.contains(self.config.bookmark_marker.as_str()))
        {
            CallKind::FieldEdit
        } else {
            CallKind::PassThrough
        };
        Ok(kind)
    }

    /// Send a call opened through [`open`](Self::open).
    ///
    /// Returns once the call has completed or, for answered lookups, once
    /// the fabricated response is installed and its events are scheduled.
    pub async fn send(&self, call: &NetworkCall, body: Option<Vec<u8>>) {
        let id = call.id();
        let Some(record) = self.tracked(id) else {
            debug!("{} was not opened through the interceptor", id);
            call.send(self.transport.as_ref(), body).await;
            return;
        };
        let _tracked = TrackedCall {
            calls: &self.calls,
            id,
        };

        let kind = match self.classify(&record.method, &record.target_url) {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Could not classify {}: {}", record.target_url, e);
                CallKind::PassThrough
            }
        };
        self.mark(call, kind);

        if record.target_url.contains("thumb") {
            self.observe_thumbnail(call, &record);
        }

        match kind {
            CallKind::MetadataLookup => match self.answer_lookup(call, &record.target_url).await {
                Ok(()) => return,
                Err(e) => warn!(
                    "URL data interception failed for {}, passing through: {:#}",
                    record.target_url, e
                ),
            },
            CallKind::BookmarkCreate => self.observe_creation(call),
            CallKind::FieldEdit => self.observe_edit(call, &record, body.as_deref()),
            CallKind::PassThrough => {}
        }

        call.send(self.transport.as_ref(), body).await;
    }

    fn mark(&self, call: &NetworkCall, kind: CallKind) {
        let mut calls = self.calls.lock();
        let Some(record) = calls.get_mut(&call.id()) else {
            return;
        };
        record.recognized = kind != CallKind::PassThrough;
        if matches!(kind, CallKind::BookmarkCreate | CallKind::FieldEdit) {
            record.captured_headers = Some(call.request_headers().into_iter().collect());
        }
    }

    async fn answer_lookup(&self, call: &NetworkCall, target: &str) -> anyhow::Result<()> {
        let parsed = self.resolve(target)?;
        let page = parsed
            .query_pairs()
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .context("missing url query parameter")?;

        debug!("URL data request for {}", page);
        let urldata = self.extractor.extract(&page).await?;
        let payload = serde_json::to_value(UrlDataResponse { urldata: &urldata })
            .context("Failed to serialize URL data")?;

        synthesize(call, &payload);
        debug!("URL data response scheduled for {}", page);
        Ok(())
    }

    fn observe_creation(&self, call: &NetworkCall) {
        let queue = self.enrich_queue.clone();
        let calls = self.calls.clone();

        call.add_event_listener(CallEvent::Load, move |call| {
            if !is_success(call.status()) {
                debug!("Bookmark save returned HTTP {}", call.status());
                return;
            }
            let created = match serde_json::from_slice::<CreatedBookmark>(&call.response_body()) {
                Ok(created) => created,
                Err(e) => {
                    warn!("Failed to handle save response: {}", e);
                    return;
                }
            };
            info!("Bookmark {} saved", created.pk);

            let session = calls
                .lock()
                .get(&call.id())
                .and_then(|record| record.captured_headers.as_ref())
                .map(|headers| session_headers(headers))
                .unwrap_or_default();

            match &queue {
                Some(queue) => {
                    queue.submit(EnrichJob {
                        bookmark_id: created.pk,
                        created,
                        session,
                    });
                }
                None => debug!("No enrichment queue, bookmark {} left as is", created.pk),
            }
        });
    }

    fn observe_edit(&self, call: &NetworkCall, record: &InterceptedCall, body: Option<&[u8]>) {
        debug!("Edit request detected: {} {}", record.method, record.target_url);

        let diagnostics = self.diagnostics.clone();
        let calls = self.calls.clone();
        let url = record.target_url.clone();
        let method = record.method.clone();
        let body = body.map(|b| String::from_utf8_lossy(b).into_owned());

        call.add_event_listener(CallEvent::Load, move |call| {
            if !is_success(call.status()) {
                return;
            }
            let headers = calls
                .lock()
                .get(&call.id())
                .and_then(|record| record.captured_headers.clone())
                .unwrap_or_default();
            diagnostics.record(EditSnapshot {
                url: url.clone(),
                method: method.clone(),
                headers,
                body: body.clone(),
                response: call.response_text(),
                captured_at: Utc::now(),
            });
            debug!("Captured successful edit request {} {}", method, url);
        });
    }

    fn observe_thumbnail(&self, call: &NetworkCall, record: &InterceptedCall) {
        debug!(
            "Thumbnail request intercepted: {} {}",
            record.method, record.target_url
        );
        call.add_event_listener(CallEvent::Load, |call| {
            if call.status() == 200 {
                debug!(
                    "Successful thumbnail request: {} [{}]",
                    call.response_text(),
                    call.all_response_headers().trim_end()
                );
            }
        });
    }

    /// Page-level fetch entry point. Always forwards; auth and login
    /// exchanges are additionally logged.
    pub async fn fetch(
        &self,
        request: OutgoingRequest,
    ) -> Result<TransportResponse, TransportError> {
        if !is_auth_url(&request.url) {
            return self.transport.send(request).await;
        }

        debug!("Fetch auth request intercepted: {} {}", request.method, request.url);
        let url = request.url.clone();
        let response = self.transport.send(request).await?;

        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(data) => debug!(
                "Fetch auth response from {} (HTTP {}): {} [{} headers]",
                url,
                response.status,
                data,
                response.headers.len()
            ),
            Err(e) => debug!("Failed to parse fetch auth response from {}: {}", url, e),
        }

        Ok(response)
    }
}
