//! Endpoint patterns and timing constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path answered locally with extracted link-preview data
pub const URLDATA_PATH: &str = "/api/get-urldata/";

/// Path whose successful responses trigger enrichment
pub const ADD_BOOKMARK_PATH: &str = "/api/add-urlbookmark/";

/// Substring marking a bookmark edit call (any method)
pub const EDIT_MARKER: &str = "edit-urlbookmark";

/// Substring marking a bookmark resource (edit only under PATCH/PUT)
pub const BOOKMARK_MARKER: &str = "urlbookmark";

/// Host endpoint for thumbnail uploads, relative to the upstream origin
pub const THUMBNAIL_PATH: &str = "/api/edit-urlbookmark-thumb/";

/// Host endpoint for field-scoped edits, relative to the upstream origin
pub const FIELD_EDIT_PATH: &str = "/api/edit-urlbookmark/";

/// Pause between dependent update steps
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Timeout for fetching a target page
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                                      (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the host API (requests are forwarded here)
    pub upstream: String,
    pub urldata_path: String,
    pub add_bookmark_path: String,
    pub edit_marker: String,
    pub bookmark_marker: String,
    pub thumbnail_path: String,
    pub field_edit_path: String,
    /// Settle delay in milliseconds
    pub settle_ms: u64,
    /// Page fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: "https://core.ggather.com".to_string(),
            urldata_path: URLDATA_PATH.to_string(),
            add_bookmark_path: ADD_BOOKMARK_PATH.to_string(),
            edit_marker: EDIT_MARKER.to_string(),
            bookmark_marker: BOOKMARK_MARKER.to_string(),
            thumbnail_path: THUMBNAIL_PATH.to_string(),
            field_edit_path: FIELD_EDIT_PATH.to_string(),
            settle_ms: SETTLE_DELAY.as_millis() as u64,
            fetch_timeout_secs: FETCH_TIMEOUT.as_secs(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Host API base without a trailing slash
    pub fn api_base(&self) -> &str {
        self.upstream.trim_end_matches('/')
    }
}
