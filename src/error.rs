//! Error types shared by the extractor, the transport and the orchestrator.

use thiserror::Error;

/// Failure of a single metadata extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page could not be retrieved: network failure, timeout,
    /// non-success status or a non-HTML content type.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The body could not be turned into a document at all.
    #[error("failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },
}

impl ExtractError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

/// The enrichment step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Thumbnail,
    Title,
    Description,
}

impl std::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateStep::Thumbnail => "thumbnail",
            UpdateStep::Title => "title",
            UpdateStep::Description => "description",
        };
        write!(f, "{}", s)
    }
}

/// Failures surfaced by one enrichment run.
///
/// `ComponentNotFound` and `Extract` abort the run. `UpdateStep` is only
/// ever reported for a single step and never stops its siblings.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("no bookmark component available for bookmark {bookmark_id}")]
    ComponentNotFound { bookmark_id: u64 },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("{step} update failed for bookmark {bookmark_id}: {source}")]
    UpdateStep {
        step: UpdateStep,
        bookmark_id: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// Failure of the underlying forwarding mechanism.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}
