//! Fabricated responses for calls the interceptor answers itself.

use serde_json::Value;
use tracing::{debug, warn};

use crate::call::{CallEvent, NetworkCall, ResponseHeaders};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Complete `call` as a `200 OK` JSON response carrying `body`.
///
/// The call's status, body and ready state are set before this returns;
/// `readystatechange`, `load` and `loadend` are delivered from a spawned
/// task, so listeners never run inside the caller's turn. Must be called
/// from within a tokio runtime. A call that already completed is left alone.
pub fn synthesize(call: &NetworkCall, body: &Value) {
    let text = body.to_string();
    let installed = call.settle(
        200,
        "OK",
        text.into_bytes(),
        ResponseHeaders::ContentTypeOnly(JSON_CONTENT_TYPE.to_string()),
    );
    if !installed {
        warn!("{} already completed, not synthesizing", call.id());
        return;
    }

    let call = call.clone();
    tokio::spawn(async move {
        call.dispatch(CallEvent::ReadyStateChange);
        call.dispatch(CallEvent::Load);
        call.dispatch(CallEvent::LoadEnd);
        debug!("Synthesized response delivered for {}", call.id());
    });
}
