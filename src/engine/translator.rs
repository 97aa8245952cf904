use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use tracing::{info, warn};

use super::media;
use super::store::Mapping;
use super::{Migrator, TargetRef};
use crate::clients::NodeKind;
use crate::config::{AppConfig, AreaConfig, AreaPathStrategy};
use crate::model::source::SourceItem;
use crate::model::target::{ItemPayload, Milestone, TargetVariant};
use crate::util::html::html_to_markdown;

impl Migrator<'_> {
    /// Produce and create exactly one target item for a source item that is
    /// not yet in the identity map. Returns the persisted mapping, or
    /// `None` when the create reported a duplicate (no iid is available
    /// from the error, so the item stays unmapped and the next run
    /// re-drives it).
    pub(crate) async fn create_target_item(
        &mut self,
        item: &SourceItem,
    ) -> Result<Option<Mapping>> {
        let title = if item.title.is_empty() {
            format!("Untitled ADO Item {}", item.id)
        } else {
            item.title.clone()
        };

        let mut html = String::new();
        for field_ref in &self.cfg.source.description_fields {
            let Some(content) = item.rich_fields.get(field_ref) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            if !html.is_empty() {
                html.push_str("\n<hr/>\n");
            }
            html.push_str(content);
        }
        // Images must be rehosted before the Markdown conversion so the
        // rewritten references survive it.
        if self.cfg.comments.migrate_images {
            html = media::migrate_images_in_html(
                &html,
                self.source,
                self.target,
                &self.retry,
                &self.cfg.comments,
            )
            .await;
        }
        let description = format!("{}{}", html_to_markdown(&html), migration_footer(item));

        let variant = self
            .cfg
            .types
            .map
            .get(&item.item_type)
            .copied()
            .unwrap_or(self.cfg.types.default);

        let (label_names, close_after_create) =
            derive_label_names(self.cfg, &self.cfg.source.project, item, variant);
        let mut labels = Vec::new();
        for name in &label_names {
            if let Some(resolved) = self
                .labels
                .get_or_create_label(self.target, &self.retry, name)
                .await
            {
                labels.push(resolved);
            }
        }

        let milestone = if self.cfg.milestones.enabled && !item.iteration_path.is_empty() {
            self.resolve_iteration_milestone(item).await
        } else {
            None
        };
        if variant == TargetVariant::Epic {
            if let Some(m) = &milestone {
                info!(
                    "Milestone '{}' prepared for ADO #{}, but epics do not take project milestones.",
                    m.title, item.id
                );
            }
        }

        let payload = ItemPayload {
            title,
            description,
            labels,
            milestone_id: match variant {
                TargetVariant::Issue => milestone.map(|m| m.id),
                TargetVariant::Epic => None,
            },
        };

        let mapping = match variant {
            TargetVariant::Epic => {
                let desc = format!("create GitLab epic for ADO #{}", item.id);
                match self.retry.call(&desc, || self.target.create_epic(&payload)).await? {
                    Some(epic) => {
                        info!("SUCCESS: Created GitLab Epic #{} for ADO #{}", epic.iid, item.id);
                        Mapping {
                            variant,
                            iid: epic.iid,
                            global_id: epic.id,
                        }
                    }
                    None => {
                        warn!(
                            "Epic create for ADO #{} reported an existing duplicate; leaving it unmapped for the next run.",
                            item.id
                        );
                        return Ok(None);
                    }
                }
            }
            TargetVariant::Issue => {
                let desc = format!("create GitLab issue for ADO #{}", item.id);
                match self.retry.call(&desc, || self.target.create_issue(&payload)).await? {
                    Some(issue) => {
                        info!(
                            "SUCCESS: Created GitLab Issue #{} for ADO #{}",
                            issue.iid, item.id
                        );
                        if close_after_create {
                            self.close_issue_best_effort(issue.iid).await;
                        }
                        Mapping {
                            variant,
                            iid: issue.iid,
                            global_id: issue.id,
                        }
                    }
                    None => {
                        warn!(
                            "Issue create for ADO #{} reported an existing duplicate; leaving it unmapped for the next run.",
                            item.id
                        );
                        return Ok(None);
                    }
                }
            }
        };

        // Flushed before any dependent work so a crash here resumes
        // without a duplicate create.
        self.store
            .put(item.id, mapping)
            .context("persist identity mapping")?;
        Ok(Some(mapping))
    }

    /// Re-fetch the target item for an already-mapped source item so its
    /// comments can still be processed. Fetch failure degrades to `None`.
    pub(crate) async fn fetch_existing_target(
        &self,
        source_id: i64,
        mapping: Mapping,
    ) -> Option<TargetRef> {
        let result = match mapping.variant {
            TargetVariant::Epic => self
                .retry
                .call(&format!("fetch existing epic {}", mapping.iid), || {
                    self.target.get_epic(mapping.iid)
                })
                .await
                .map(|opt| opt.is_some()),
            TargetVariant::Issue => self
                .retry
                .call(&format!("fetch existing issue {}", mapping.iid), || {
                    self.target.get_issue(mapping.iid)
                })
                .await
                .map(|opt| opt.is_some()),
        };
        match result {
            Ok(true) => Some(TargetRef {
                variant: mapping.variant,
                iid: mapping.iid,
            }),
            Ok(false) => None,
            Err(e) => {
                tracing::error!(
                    "Failed to fetch existing GitLab {} #{} for ADO #{source_id}: {e}",
                    mapping.variant,
                    mapping.iid
                );
                None
            }
        }
    }

    async fn resolve_iteration_milestone(&mut self, item: &SourceItem) -> Option<Milestone> {
        let path = &item.iteration_path;
        let title = self
            .cfg
            .milestones
            .title_overrides
            .get(path)
            .cloned()
            .or_else(|| {
                path.split(self.cfg.areas.level_separator.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .last()
                    .map(String::from)
            });
        let Some(title) = title else {
            warn!("Could not determine a milestone title for iteration path '{path}'");
            return None;
        };

        if !self.iteration_nodes.contains_key(path) {
            let node = match self
                .source
                .classification_node(NodeKind::Iterations, path)
                .await
            {
                Ok(node) => node,
                Err(e) => {
                    warn!("Failed to fetch iteration node '{path}': {e}");
                    None
                }
            };
            self.iteration_nodes.insert(path.clone(), node);
        }
        let node = self.iteration_nodes.get(path).and_then(|n| n.as_ref());
        let start = node
            .and_then(|n| n.start_date.as_deref())
            .and_then(source_date_to_day);
        let due = node
            .and_then(|n| n.finish_date.as_deref())
            .and_then(source_date_to_day);

        let resolved = self
            .labels
            .get_or_create_milestone(
                self.target,
                &self.retry,
                &title,
                start.as_deref(),
                due.as_deref(),
            )
            .await;
        if resolved.is_none() {
            warn!(
                "Could not find or create milestone for iteration path '{path}' (title '{title}')"
            );
        }
        resolved
    }

    /// State transition is fetch, set closed, save; each step retry-wrapped.
    /// A failure here is per-sub-operation: the item still counts as
    /// migrated.
    async fn close_issue_best_effort(&self, iid: u64) {
        let fetched = self
            .retry
            .call(&format!("fetch issue {iid} for closing"), || {
                self.target.get_issue(iid)
            })
            .await;
        match fetched {
            Ok(Some(_)) => {
                match self
                    .retry
                    .call(&format!("close GitLab issue #{iid}"), || {
                        self.target.close_issue(iid)
                    })
                    .await
                {
                    Ok(_) => info!("Closed GitLab Issue #{iid}"),
                    Err(e) => warn!("Could not close GitLab Issue #{iid}: {e}"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not fetch GitLab Issue #{iid} for closing: {e}"),
        }
    }
}

/// Audit-trail footer appended to every migrated description. Must be
/// byte-for-byte reproducible for the same source item.
pub fn migration_footer(item: &SourceItem) -> String {
    let mut footer = format!(
        "\n\n---\nMigrated from ADO #{} (Type: {}, State: {}",
        item.id, item.item_type, item.state
    );
    if let Some(priority) = item.priority {
        footer.push_str(&format!(", Priority: {priority}"));
    }
    if !item.tags.is_empty() {
        footer.push_str(&format!(", Original ADO Tags: {}", item.tags));
    }
    if !item.area_path.is_empty() {
        footer.push_str(&format!(", Original Area: {}", item.area_path));
    }
    if !item.iteration_path.is_empty() {
        footer.push_str(&format!(", Original Iteration: {}", item.iteration_path));
    }
    footer.push(')');
    footer
}

/// Derive the label set (and whether the issue should be closed after
/// creation) from source metadata. Pure; duplicates are removed with set
/// semantics, keeping first occurrence order.
pub fn derive_label_names(
    cfg: &AppConfig,
    project: &str,
    item: &SourceItem,
    variant: TargetVariant,
) -> (Vec<String>, bool) {
    let mut names: Vec<String> = Vec::new();
    let mut close = false;

    if let Some(rule) = cfg.states.map.get(&item.state) {
        names.extend(rule.labels.iter().cloned());
        close = rule.close;
    } else if !item.state.is_empty() && item.state != "Undefined" {
        names.push(format!("{}{}", cfg.states.unmapped_prefix, item.state));
    }

    if let Some(priority) = item.priority {
        if !cfg.priorities.map.is_empty() {
            match cfg.priorities.map.get(&priority.to_string()) {
                Some(label) => names.push(label.clone()),
                None => names.push(format!("{}{priority}", cfg.priorities.unmapped_prefix)),
            }
        }
    }

    // Epics carry the type implicitly; issues get it as a label.
    if variant != TargetVariant::Epic && !item.item_type.is_empty() {
        names.push(format!("ado_type::{}", item.item_type));
    }

    if cfg.tags.enabled && !item.tags.is_empty() {
        for tag in item.tags.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            names.push(format!("{}{tag}", cfg.tags.prefix));
        }
    }

    if cfg.areas.enabled && !item.area_path.is_empty() {
        names.extend(area_path_labels(&cfg.areas, project, &item.area_path));
    }

    let mut seen = HashSet::new();
    let names = names
        .into_iter()
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect();
    (names, close)
}

/// Turn a hierarchical area path into label names under the configured
/// strategy. The leading segment repeating the project name is dropped.
pub fn area_path_labels(cfg: &AreaConfig, project: &str, area_path: &str) -> Vec<String> {
    let mut segments: Vec<&str> = area_path
        .split(cfg.level_separator.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments
        .first()
        .is_some_and(|s| s.to_lowercase() == project.to_lowercase())
    {
        segments.remove(0);
    }
    if segments.is_empty() {
        return Vec::new();
    }
    match cfg.strategy {
        AreaPathStrategy::LastSegmentOnly => segments
            .last()
            .map(|s| format!("{}{s}", cfg.prefix))
            .into_iter()
            .collect(),
        AreaPathStrategy::FullPath => {
            vec![format!(
                "{}{}",
                cfg.prefix,
                segments.join(&cfg.label_separator)
            )]
        }
        AreaPathStrategy::AllSegments => segments
            .iter()
            .map(|s| format!("{}{s}", cfg.prefix))
            .collect(),
        AreaPathStrategy::AllSegmentsHierarchical => {
            let mut labels = Vec::new();
            let mut current = String::new();
            for (i, segment) in segments.iter().enumerate() {
                if i == 0 {
                    current = (*segment).to_string();
                } else {
                    current = format!("{current}{}{segment}", cfg.label_separator);
                }
                labels.push(format!("{}{current}", cfg.prefix));
            }
            labels
        }
    }
}

/// Reduce a source timestamp (ISO datetime or bare day) to `YYYY-MM-DD`.
pub fn source_date_to_day(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }
    let day = raw.split('T').next()?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}
