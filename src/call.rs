//! In-flight network call handle.
//!
//! A [`NetworkCall`] mirrors the host page's request object: it is opened
//! with a method and URL, collects request headers, is sent once, and
//! reports completion through `readystatechange`, `load`/`error` and
//! `loadend` listeners. Clones share the same call; identity is [`CallId`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::transport::{OutgoingRequest, Transport, TransportResponse};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    #[default]
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallEvent {
    ReadyStateChange,
    Load,
    Error,
    LoadEnd,
}

/// How response headers are reported
#[derive(Debug, Clone)]
pub enum ResponseHeaders {
    /// Headers received from a real exchange
    Received(Vec<(String, String)>),
    /// A fabricated response that only knows its content type
    ContentTypeOnly(String),
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        ResponseHeaders::Received(Vec::new())
    }
}

type Listener = Arc<dyn Fn(&NetworkCall) + Send + Sync>;

#[derive(Debug, Default)]
struct CallState {
    method: String,
    url: String,
    request_headers: Vec<(String, String)>,
    ready_state: ReadyState,
    status: u16,
    status_text: String,
    response_body: Vec<u8>,
    response_headers: ResponseHeaders,
}

struct CallInner {
    id: CallId,
    state: Mutex<CallState>,
    listeners: Mutex<Vec<(CallEvent, Listener)>>,
    completed: AtomicBool,
}

#[derive(Clone)]
pub struct NetworkCall {
    inner: Arc<CallInner>,
}

impl fmt::Debug for NetworkCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NetworkCall")
            .field("id", &self.inner.id)
            .field("method", &state.method)
            .field("url", &state.url)
            .field("ready_state", &state.ready_state)
            .field("status", &state.status)
            .finish()
    }
}

impl Default for NetworkCall {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkCall {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CallInner {
                id: CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)),
                state: Mutex::new(CallState::default()),
                listeners: Mutex::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> CallId {
        self.inner.id
    }

    pub fn open(&self, method: &str, url: &str) {
        let mut state = self.inner.state.lock();
        state.method = method.to_ascii_uppercase();
        state.url = url.to_string();
        state.ready_state = ReadyState::Opened;
    }

    /// Add a request header. Repeated names are combined with `", "`.
    pub fn set_request_header(&self, name: &str, value: &str) {
        let mut state = self.inner.state.lock();
        match state
            .request_headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => state
                .request_headers
                .push((name.to_string(), value.to_string())),
        }
    }

    pub fn method(&self) -> String {
        self.inner.state.lock().method.clone()
    }

    pub fn url(&self) -> String {
        self.inner.state.lock().url.clone()
    }

    pub fn request_headers(&self) -> Vec<(String, String)> {
        self.inner.state.lock().request_headers.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.lock().status_text.clone()
    }

    pub fn response_body(&self) -> Vec<u8> {
        self.inner.state.lock().response_body.clone()
    }

    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.inner.state.lock().response_body).into_owned()
    }

    /// All response headers as a `name: value` CRLF-separated blob
    pub fn all_response_headers(&self) -> String {
        match &self.inner.state.lock().response_headers {
            ResponseHeaders::Received(headers) => headers
                .iter()
                .map(|(n, v)| format!("{}: {}\r\n", n, v))
                .collect(),
            ResponseHeaders::ContentTypeOnly(content_type) => {
                format!("content-type: {}", content_type)
            }
        }
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        match &self.inner.state.lock().response_headers {
            ResponseHeaders::Received(headers) => headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone()),
            ResponseHeaders::ContentTypeOnly(content_type) => name
                .eq_ignore_ascii_case("content-type")
                .then(|| content_type.clone()),
        }
    }

    /// Response headers as pairs, for re-serving the call
    pub fn response_header_pairs(&self) -> Vec<(String, String)> {
        match &self.inner.state.lock().response_headers {
            ResponseHeaders::Received(headers) => headers.clone(),
            ResponseHeaders::ContentTypeOnly(content_type) => {
                vec![("content-type".to_string(), content_type.clone())]
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn add_event_listener<F>(&self, event: CallEvent, listener: F)
    where
        F: Fn(&NetworkCall) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push((event, Arc::new(listener)));
    }

    /// Resolves once `loadend` has fired. Register before sending.
    pub fn completion(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.add_event_listener(CallEvent::LoadEnd, move |_| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        });
        rx
    }

    pub(crate) fn dispatch(&self, event: CallEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(self);
        }
    }

    /// Install a final response. Returns false if the call already completed.
    pub(crate) fn settle(
        &self,
        status: u16,
        status_text: &str,
        body: Vec<u8>,
        headers: ResponseHeaders,
    ) -> bool {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut state = self.inner.state.lock();
        state.status = status;
        state.status_text = status_text.to_string();
        state.response_body = body;
        state.response_headers = headers;
        state.ready_state = ReadyState::Done;
        true
    }

    /// Perform the real exchange through `transport` and deliver its events.
    ///
    /// A transport failure leaves status 0 and fires `error` instead of `load`.
    pub async fn send(&self, transport: &dyn Transport, body: Option<Vec<u8>>) {
        let request = {
            let mut state = self.inner.state.lock();
            state.ready_state = ReadyState::Loading;
            OutgoingRequest {
                method: state.method.clone(),
                url: state.url.clone(),
                headers: state.request_headers.clone(),
                body,
            }
        };

        let outcome = match transport.send(request).await {
            Ok(TransportResponse {
                status,
                status_text,
                headers,
                body,
            }) => self
                .settle(status, &status_text, body, ResponseHeaders::Received(headers))
                .then_some(CallEvent::Load),
            Err(e) => {
                tracing::debug!("{} failed: {}", self.id(), e);
                self.settle(0, "", Vec::new(), ResponseHeaders::default())
                    .then_some(CallEvent::Error)
            }
        };

        if let Some(event) = outcome {
            self.dispatch(CallEvent::ReadyStateChange);
            self.dispatch(event);
            self.dispatch(CallEvent::LoadEnd);
        }
    }
}
