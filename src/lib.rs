//! Bookmark enricher - answers a bookmarking app's link-preview lookups with
//! metadata extracted from the target page, and enriches newly saved
//! bookmarks through the app's own update endpoints.

pub mod call;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod interceptor;
pub mod metadata;
pub mod orchestrator;
pub mod server;
pub mod synthesizer;
pub mod transport;

pub use call::{CallEvent, CallId, NetworkCall, ReadyState};
pub use config::Config;
pub use error::{EnrichError, ExtractError, TransportError, UpdateStep};
pub use interceptor::{CallKind, EditDiagnostics, EditSnapshot, InterceptedCall, RequestInterceptor};
pub use metadata::{parse_document, MetadataExtractor, MetadataRecord, MetadataSource};
pub use orchestrator::{
    BookmarkComponent, ComponentLocator, ComponentRegistry, CreatedBookmark, EnrichJob,
    EnrichQueue, UpdateOrchestrator,
};
pub use synthesizer::synthesize;
pub use transport::{HttpTransport, Transport};
