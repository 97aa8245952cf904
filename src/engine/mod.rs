pub mod comments;
pub mod labels;
pub mod links;
pub mod media;
pub mod retry;
pub mod store;
pub mod translator;

#[cfg(test)]
pub mod testing;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::clients::{SourceApi, TargetApi};
use crate::config::AppConfig;
use crate::model::source::{ClassificationNode, SourceItem};
use crate::model::target::TargetVariant;
use labels::LabelResolver;
use retry::RetryPolicy;
use store::{save_checkpoint, IdentityMap};

/// Fields always requested in the Phase-1 batch fetch; the configured
/// description and priority fields are appended.
const BASE_FIELDS: &[&str] = &[
    "System.Id",
    "System.Title",
    "System.WorkItemType",
    "System.State",
    "System.Tags",
    "System.CreatedDate",
    "System.CreatedBy",
    "System.AreaPath",
    "System.IterationPath",
];

/// Everything a run needs, constructed once and threaded explicitly —
/// no ambient globals.
pub struct Migrator<'a> {
    pub(crate) cfg: &'a AppConfig,
    pub(crate) source: &'a dyn SourceApi,
    pub(crate) target: &'a dyn TargetApi,
    pub(crate) retry: RetryPolicy,
    pub(crate) store: IdentityMap,
    pub(crate) labels: LabelResolver,
    /// Lazy per-run cache of iteration node lookups, keyed by the raw
    /// path string. Never invalidated within a run.
    pub(crate) iteration_nodes: HashMap<String, Option<ClassificationNode>>,
    pub(crate) summary: RunSummary,
}

/// The target item a source item resolved to, for comment replay.
pub struct TargetRef {
    pub variant: TargetVariant,
    pub iid: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub items_seen: usize,
    pub created: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub comments_migrated: usize,
    pub comments_failed: usize,
    pub links_created: usize,
    pub links_skipped: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Items processed: {} (created: {}, already migrated: {}, failed: {})",
            self.items_seen, self.created, self.skipped_existing, self.failed
        )?;
        writeln!(
            f,
            "Comments migrated: {} (failed/skipped: {})",
            self.comments_migrated, self.comments_failed
        )?;
        write!(
            f,
            "Relation links created: {} (skipped: {})",
            self.links_created, self.links_skipped
        )
    }
}

impl<'a> Migrator<'a> {
    pub fn new(
        cfg: &'a AppConfig,
        source: &'a dyn SourceApi,
        target: &'a dyn TargetApi,
        store: IdentityMap,
    ) -> Self {
        Self {
            labels: LabelResolver::new(&cfg.labels),
            cfg,
            source,
            target,
            retry: RetryPolicy::default(),
            store,
            iteration_nodes: HashMap::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the full two-phase migration: create every unmapped item (with
    /// comments), then replay relation edges. Per-item failures are logged
    /// and counted; only setup-level failures (the initial source query)
    /// propagate.
    pub async fn run(mut self) -> Result<RunSummary> {
        let ids = self
            .source
            .query_item_ids()
            .await
            .context("Failed to query work item ids from the source system")?;
        if ids.is_empty() {
            info!("No work items to process based on the source query.");
        } else {
            info!("Found {} work item references from the source query.", ids.len());
        }

        let items = self.fetch_all_items(&ids).await;
        info!(
            "--- Phase 1: Creating epics and issues (from {} fetched details) ---",
            items.len()
        );
        let mut completed: Vec<i64> = Vec::new();
        for item in &items {
            self.summary.items_seen += 1;
            info!("Processing ADO work item #{}...", item.id);

            let target_ref = if let Some(mapping) = self.store.get(item.id).copied() {
                info!(
                    "ADO #{} already mapped to GitLab {} #{}. Will not re-create item.",
                    item.id, mapping.variant, mapping.iid
                );
                self.summary.skipped_existing += 1;
                self.fetch_existing_target(item.id, mapping).await
            } else {
                match self.create_target_item(item).await {
                    Ok(Some(mapping)) => {
                        self.summary.created += 1;
                        Some(TargetRef {
                            variant: mapping.variant,
                            iid: mapping.iid,
                        })
                    }
                    Ok(None) => None,
                    Err(e) => {
                        error!(
                            "UNEXPECTED ERROR during item creation phase for ADO #{}: {e:#}",
                            item.id
                        );
                        self.summary.failed += 1;
                        None
                    }
                }
            };

            if self.cfg.comments.enabled {
                if let Some(target_ref) = &target_ref {
                    self.migrate_comments(item, target_ref).await;
                }
            }

            if self.store.contains(item.id) {
                completed.push(item.id);
            }
            if let Err(e) = save_checkpoint(&self.cfg.checkpoint_path(), &completed, items.len())
            {
                warn!("Could not write checkpoint: {e:#}");
            }
        }

        info!("--- Phase 2: Linking parent/child and other relations ---");
        self.link_relations(&ids).await;

        Ok(self.summary)
    }

    /// Chunked batch fetch without relation expansion (Phase 2 re-fetches
    /// with expansion). A failed chunk is logged and skipped; its items are
    /// picked up by the next run.
    async fn fetch_all_items(&self, ids: &[i64]) -> Vec<SourceItem> {
        let fields = self.batch_fields();
        let chunk_size = self.cfg.source.batch_fetch_size.max(1);
        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(chunk_size) {
            info!(
                "Fetching details for ADO id chunk starting at #{} ({} ids)",
                chunk[0],
                chunk.len()
            );
            match self.source.fetch_items(chunk, &fields, false).await {
                Ok(batch) => {
                    info!(
                        "Fetched {} details in this chunk. Total so far: {}",
                        batch.len(),
                        items.len() + batch.len()
                    );
                    items.extend(batch);
                }
                Err(e) => {
                    error!(
                        "Failed to fetch details for chunk starting at ADO #{}: {e}",
                        chunk[0]
                    );
                }
            }
        }
        items
    }

    fn batch_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = BASE_FIELDS.iter().map(|s| s.to_string()).collect();
        for field_ref in &self.cfg.source.description_fields {
            if !field_ref.is_empty() && !fields.contains(field_ref) {
                fields.push(field_ref.clone());
            }
        }
        if let Some(priority_field) = &self.cfg.source.priority_field {
            if !priority_field.is_empty() && !fields.contains(priority_field) {
                fields.push(priority_field.clone());
            }
        }
        fields
    }
}
