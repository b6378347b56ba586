//! Post-save enrichment of bookmarks.
//!
//! After the host creates a bookmark, [`UpdateOrchestrator::enrich`] pushes
//! the extracted thumbnail, title and description back through the host's
//! own update operations, one step at a time with a settle delay between
//! dependent steps. Jobs arrive through an [`EnrichQueue`] so the call that
//! observed the save never waits on them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EnrichError, UpdateStep};
use crate::metadata::MetadataSource;

/// Provenance marker for thumbnails supplied from outside the host
pub const THUMBNAIL_WORN_SELF: &str = "self";

/// The bookmark creation response, as far as enrichment needs it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedBookmark {
    pub pk: u64,
    pub url: String,
    #[serde(default)]
    pub rating: Option<Value>,
    #[serde(default)]
    pub owner_notes: Option<String>,
}

/// The host component's edit buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub pk: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_notes: Option<String>,
}

impl PendingEdit {
    fn seeded(created: &CreatedBookmark) -> Self {
        Self {
            pk: created.pk,
            url: created.url.clone(),
            rating: created.rating.clone(),
            owner_notes: created.owner_notes.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailChange {
    pub thumbnail: String,
    pub thumbnail_worn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkField {
    Title,
    Description,
}

impl BookmarkField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkField::Title => "title",
            BookmarkField::Description => "description",
        }
    }
}

/// Capabilities of the host's live bookmark-editing component.
#[async_trait]
pub trait BookmarkComponent: Send + Sync {
    /// Point the component at `url` and run the host's basic URL validation
    async fn validate_url(&self, url: &str) -> anyhow::Result<()>;

    async fn upload_thumbnail(&self, url: &str, image_url: &str) -> anyhow::Result<()>;

    /// Reflect an uploaded thumbnail in the component's local state
    fn commit_thumbnail(&self, change: ThumbnailChange);

    fn pending_edit(&self) -> Option<PendingEdit>;

    fn set_pending_edit(&self, edit: PendingEdit);

    /// Persist one field of the pending edit buffer
    async fn edit_field(&self, field: BookmarkField) -> anyhow::Result<()>;
}

/// Finds the component able to edit the bookmark in `job`.
pub trait ComponentLocator: Send + Sync {
    fn locate(&self, job: &EnrichJob) -> Option<Arc<dyn BookmarkComponent>>;
}

/// Live components, one per bookmark they are editing.
#[derive(Default)]
pub struct ComponentRegistry {
    live: RwLock<HashMap<u64, Arc<dyn BookmarkComponent>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `component` to bookmark `pk`, replacing any earlier binding
    pub fn register(&self, pk: u64, component: Arc<dyn BookmarkComponent>) {
        self.live.write().insert(pk, component);
    }

    pub fn remove(&self, pk: u64) -> Option<Arc<dyn BookmarkComponent>> {
        self.live.write().remove(&pk)
    }

    pub fn clear(&self) {
        self.live.write().clear();
    }

    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }
}

impl ComponentLocator for ComponentRegistry {
    fn locate(&self, job: &EnrichJob) -> Option<Arc<dyn BookmarkComponent>> {
        self.live.read().get(&job.bookmark_id).cloned()
    }
}

/// One bookmark to enrich
#[derive(Debug, Clone)]
pub struct EnrichJob {
    pub bookmark_id: u64,
    pub created: CreatedBookmark,
    /// Credentials of the session that created the bookmark
    pub session: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was extracted for this field
    Skipped,
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichReport {
    pub thumbnail: StepOutcome,
    pub title: StepOutcome,
    pub description: StepOutcome,
}

pub struct UpdateOrchestrator {
    extractor: Arc<dyn MetadataSource>,
    locator: Arc<dyn ComponentLocator>,
    settle_delay: Duration,
}

impl UpdateOrchestrator {
    pub fn new(
        extractor: Arc<dyn MetadataSource>,
        locator: Arc<dyn ComponentLocator>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            extractor,
            locator,
            settle_delay,
        }
    }

    /// Enrich the bookmark in `job`.
    ///
    /// Aborts only when no component is available or extraction fails.
    /// Each update step is attempted regardless of how the previous one went.
    pub async fn enrich(&self, job: &EnrichJob) -> Result<EnrichReport, EnrichError> {
        let bookmark_id = job.bookmark_id;
        let created = &job.created;
        info!("Enriching bookmark {} ({})", bookmark_id, created.url);

        let component = self
            .locator
            .locate(job)
            .ok_or(EnrichError::ComponentNotFound { bookmark_id })?;

        let urldata = self.extractor.extract(&created.url).await?;

        if let Err(e) = component.validate_url(&created.url).await {
            warn!("URL validation failed for bookmark {}: {:#}", bookmark_id, e);
        }

        let thumbnail = match &urldata.thumbnail {
            Some(thumbnail) => {
                debug!("Updating thumbnail...");
                let result = self
                    .apply_thumbnail(component.as_ref(), &created.url, thumbnail)
                    .await;
                let outcome = Self::outcome(UpdateStep::Thumbnail, bookmark_id, result);
                tokio::time::sleep(self.settle_delay).await;
                outcome
            }
            None => StepOutcome::Skipped,
        };

        let title = match &urldata.title {
            Some(title) => {
                debug!("Updating title...");
                let result = self
                    .apply_field(component.as_ref(), job, BookmarkField::Title, title)
                    .await;
                let outcome = Self::outcome(UpdateStep::Title, bookmark_id, result);
                tokio::time::sleep(self.settle_delay).await;
                outcome
            }
            None => StepOutcome::Skipped,
        };

        let description = match &urldata.description {
            Some(description) => {
                debug!("Updating description...");
                let result = self
                    .apply_field(
                        component.as_ref(),
                        job,
                        BookmarkField::Description,
                        description,
                    )
                    .await;
                Self::outcome(UpdateStep::Description, bookmark_id, result)
            }
            None => StepOutcome::Skipped,
        };

        Ok(EnrichReport {
            thumbnail,
            title,
            description,
        })
    }

    async fn apply_thumbnail(
        &self,
        component: &dyn BookmarkComponent,
        url: &str,
        thumbnail: &str,
    ) -> anyhow::Result<()> {
        component.upload_thumbnail(url, thumbnail).await?;
        component.commit_thumbnail(ThumbnailChange {
            thumbnail: thumbnail.to_string(),
            thumbnail_worn: THUMBNAIL_WORN_SELF.to_string(),
        });
        Ok(())
    }

    /// Read-modify-write of the edit buffer, then a field-scoped update.
    async fn apply_field(
        &self,
        component: &dyn BookmarkComponent,
        job: &EnrichJob,
        field: BookmarkField,
        value: &str,
    ) -> anyhow::Result<()> {
        let mut edit = component
            .pending_edit()
            .filter(|edit| edit.pk == job.bookmark_id)
            .unwrap_or_else(|| PendingEdit::seeded(&job.created));
        edit.pk = job.bookmark_id;
        match field {
            BookmarkField::Title => edit.title = Some(value.to_string()),
            BookmarkField::Description => edit.description = Some(value.to_string()),
        }
        component.set_pending_edit(edit);
        component.edit_field(field).await
    }

    fn outcome(step: UpdateStep, bookmark_id: u64, result: anyhow::Result<()>) -> StepOutcome {
        match result {
            Ok(()) => {
                info!("Bookmark {}: {} updated", bookmark_id, step);
                StepOutcome::Applied
            }
            Err(source) => {
                let err = EnrichError::UpdateStep {
                    step,
                    bookmark_id,
                    source,
                };
                warn!("{:#}", err);
                StepOutcome::Failed(err.to_string())
            }
        }
    }

    /// Start the worker that runs queued jobs, each on its own task.
    pub fn spawn(self: Arc<Self>) -> (EnrichQueue, JoinHandle<()>) {
        let (queue, mut rx) = EnrichQueue::channel();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    match orchestrator.enrich(&job).await {
                        Ok(report) => {
                            info!("Bookmark {} enriched: {:?}", job.bookmark_id, report)
                        }
                        Err(e) => {
                            error!("Enrichment aborted for bookmark {}: {}", job.bookmark_id, e)
                        }
                    }
                });
            }
            debug!("Enrichment queue closed");
        });

        (queue, handle)
    }
}

/// Submission side of the enrichment worker
#[derive(Clone)]
pub struct EnrichQueue {
    tx: mpsc::UnboundedSender<EnrichJob>,
}

impl EnrichQueue {
    /// A queue and the receiving end a worker drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EnrichJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a job without waiting. Returns false once the worker is gone.
    pub fn submit(&self, job: EnrichJob) -> bool {
        let bookmark_id = job.bookmark_id;
        if self.tx.send(job).is_err() {
            warn!("Enrichment worker stopped, dropping bookmark {}", bookmark_id);
            return false;
        }
        true
    }
}
