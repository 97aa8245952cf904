pub mod ado;
pub mod error;
pub mod gitlab;

use async_trait::async_trait;

use crate::model::source::{ClassificationNode, SourceComment, SourceItem};
use crate::model::target::{Epic, Issue, ItemPayload, Milestone, NotePayload};
use error::ApiError;

/// Which classification tree a node path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Areas,
    Iterations,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Areas => "areas",
            NodeKind::Iterations => "iterations",
        }
    }
}

/// A binary blob fetched from the source system.
pub struct DownloadedImage {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Read-only view of the originating tracking system.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Query for all work item ids in scope for the migration.
    async fn query_item_ids(&self) -> Result<Vec<i64>, ApiError>;

    /// Batch-fetch full records. When `expand_relations` is set the field
    /// list must be omitted from the request (the API rejects the
    /// combination), so `fields` is ignored in that case.
    async fn fetch_items(
        &self,
        ids: &[i64],
        fields: &[String],
        expand_relations: bool,
    ) -> Result<Vec<SourceItem>, ApiError>;

    /// All comments for one item, ascending by creation time.
    async fn fetch_comments(&self, item_id: i64) -> Result<Vec<SourceComment>, ApiError>;

    /// Area/iteration node detail for a full path string. `Ok(None)` when
    /// the node does not exist or the path resolves to the project root.
    async fn classification_node(
        &self,
        kind: NodeKind,
        path: &str,
    ) -> Result<Option<ClassificationNode>, ApiError>;

    /// Download an embedded image, enforcing the size cap and rejecting
    /// non-image (HTML error page) bodies.
    async fn download_image(
        &self,
        url: &str,
        max_bytes: u64,
    ) -> Result<DownloadedImage, ApiError>;
}

/// Mutating view of the destination tracking system. Everything here is
/// called through the retry wrapper by the engine.
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn get_issue(&self, iid: u64) -> Result<Issue, ApiError>;
    async fn create_issue(&self, payload: &ItemPayload) -> Result<Issue, ApiError>;
    async fn close_issue(&self, iid: u64) -> Result<(), ApiError>;

    async fn get_epic(&self, iid: u64) -> Result<Epic, ApiError>;
    async fn create_epic(&self, payload: &ItemPayload) -> Result<Epic, ApiError>;

    /// Exact-name label lookup; 404 means "create it".
    async fn get_label(&self, name: &str) -> Result<String, ApiError>;
    async fn create_label(&self, name: &str, color: &str) -> Result<String, ApiError>;

    /// Milestones matching a search term (substring pre-filter, not
    /// authoritative — callers scan for exact title equality).
    async fn list_milestones(&self, search: &str) -> Result<Vec<Milestone>, ApiError>;
    async fn create_milestone(
        &self,
        title: &str,
        start_date: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<Milestone, ApiError>;

    async fn create_issue_note(&self, issue_iid: u64, note: &NotePayload)
        -> Result<(), ApiError>;
    async fn create_epic_note(&self, epic_iid: u64, note: &NotePayload) -> Result<(), ApiError>;

    async fn link_issues(
        &self,
        source_iid: u64,
        target_iid: u64,
        link_type: &str,
    ) -> Result<(), ApiError>;
    async fn add_issue_to_epic(
        &self,
        epic_iid: u64,
        issue_global_id: u64,
    ) -> Result<(), ApiError>;

    /// Upload a binary blob; returns the embeddable markdown reference.
    async fn upload_attachment(&self, filename: &str, bytes: &[u8]) -> Result<String, ApiError>;
}
