use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use super::store::Mapping;
use super::Migrator;
use crate::model::source::{SourceItem, SourceRelation};
use crate::model::target::TargetVariant;

const HIERARCHY_FORWARD: &str = "System.LinkTypes.Hierarchy-Forward";
const HIERARCHY_REVERSE: &str = "System.LinkTypes.Hierarchy-Reverse";

/// Pull the target work item id out of a relation reference URL. Relations
/// whose URL does not match the work item pattern (external links, commit
/// links) are simply not work item relations.
pub fn relation_target_id(url: &str) -> Option<i64> {
    let pattern = Regex::new(r"(?i)https?://[^/]+(?:/[^/]+)?/[^/]+/_apis/wit/workitems/(\d+)")
        .expect("valid relation URL regex");
    pattern.captures(url)?.get(1)?.as_str().parse().ok()
}

impl Migrator<'_> {
    /// Phase 2: replay relation edges between items that both made it into
    /// the identity map. Re-fetches the source items with relation
    /// expansion, since the Phase-1 fetch deliberately omits relations.
    /// Safe to re-run in full — the retry wrapper absorbs "already linked".
    pub(crate) async fn link_relations(&mut self, all_ids: &[i64]) {
        if all_ids.is_empty() {
            info!("No work items to process for linking.");
            return;
        }
        let chunk_size = self.cfg.source.batch_fetch_size.max(1);
        for chunk in all_ids.chunks(chunk_size) {
            debug!(
                "Fetching relations for chunk starting at ADO #{} ({} ids)",
                chunk[0],
                chunk.len()
            );
            let items = match self.source.fetch_items(chunk, &[], true).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        "Relation fetching failed for chunk starting with ADO #{}: {e}",
                        chunk[0]
                    );
                    continue;
                }
            };
            for item in items {
                self.link_item_relations(&item).await;
            }
        }
    }

    async fn link_item_relations(&mut self, item: &SourceItem) {
        let Some(source_info) = self.store.get(item.id).copied() else {
            debug!("Source ADO #{} not in mapping. Skipping link processing.", item.id);
            return;
        };
        if item.relations.is_empty() {
            debug!("No relations found for ADO source #{}.", item.id);
            return;
        }
        info!(
            "Processing links for source ADO #{} (GitLab {} #{})...",
            item.id, source_info.variant, source_info.iid
        );
        for relation in &item.relations {
            if let Err(e) = self.process_relation(item.id, source_info, relation).await {
                warn!(
                    "Error processing relation for ADO source {} ({}): {e:#}",
                    item.id, relation.url
                );
            }
        }
    }

    async fn process_relation(
        &mut self,
        source_id: i64,
        source_info: Mapping,
        relation: &SourceRelation,
    ) -> Result<()> {
        if relation.url.is_empty() {
            debug!("Skipping relation with empty URL for source ADO #{source_id}");
            return Ok(());
        }
        let Some(target_id) = relation_target_id(&relation.url) else {
            debug!(
                "Skipping non-standard work item relation URL '{}' for source ADO #{source_id}",
                relation.url
            );
            return Ok(());
        };
        let friendly = relation.name.as_deref().unwrap_or("UnknownLinkType");
        debug!(
            "Found ADO link: #{source_id} --[{friendly} ({})]--> #{target_id}",
            relation.rel
        );

        let Some(target_info) = self.store.get(target_id).copied() else {
            info!(
                "Target ADO #{target_id} for link from ADO #{source_id} was not mapped. Skipping."
            );
            self.summary.links_skipped += 1;
            return Ok(());
        };

        let hierarchical = match relation.rel.as_str() {
            HIERARCHY_FORWARD => Some((target_info, source_info)),
            HIERARCHY_REVERSE => Some((source_info, target_info)),
            _ => None,
        };
        if let Some((parent, child)) = hierarchical {
            return self.link_hierarchy(parent, child).await;
        }

        let link_type = match self.cfg.links.map.get(&relation.rel) {
            Some(t) if t.is_empty() => {
                info!(
                    "ADO link type '{}' ({friendly}) from #{source_id} to #{target_id} is explicitly ignored in config. Skipping.",
                    relation.rel
                );
                self.summary.links_skipped += 1;
                return Ok(());
            }
            Some(t) => t.clone(),
            None => {
                if self.cfg.links.default.is_empty() {
                    debug!(
                        "ADO link type '{}' has no mapping and no default. Skipping.",
                        relation.rel
                    );
                    self.summary.links_skipped += 1;
                    return Ok(());
                }
                self.cfg.links.default.clone()
            }
        };

        if source_info.variant == TargetVariant::Issue
            && target_info.variant == TargetVariant::Issue
        {
            self.create_issue_link(source_info.iid, target_info.iid, &link_type)
                .await
        } else {
            info!(
                "Skipping generic link type '{link_type}': both items must be GitLab issues."
            );
            self.summary.links_skipped += 1;
            Ok(())
        }
    }

    async fn link_hierarchy(&mut self, parent: Mapping, child: Mapping) -> Result<()> {
        match (parent.variant, child.variant) {
            (TargetVariant::Epic, TargetVariant::Issue) => {
                let fetched = self
                    .retry
                    .call(&format!("fetch epic {} for linking", parent.iid), || {
                        self.target.get_epic(parent.iid)
                    })
                    .await?;
                if fetched.is_none() {
                    return Ok(());
                }
                let desc = format!(
                    "link GL Issue (global id {}) to GL Epic #{}",
                    child.global_id, parent.iid
                );
                if self
                    .retry
                    .call(&desc, || {
                        self.target.add_issue_to_epic(parent.iid, child.global_id)
                    })
                    .await?
                    .is_some()
                {
                    info!("SUCCESS: {desc}");
                    self.summary.links_created += 1;
                }
                Ok(())
            }
            // The target has no native issue-parent concept; the closest
            // representation is a generic relates_to link.
            (TargetVariant::Issue, TargetVariant::Issue) => {
                info!(
                    "Mapping issue-to-issue hierarchy as 'relates_to' for GL #{} and GL #{}.",
                    parent.iid, child.iid
                );
                self.create_issue_link(parent.iid, child.iid, "relates_to").await
            }
            (p, c) => {
                info!(
                    "Skipping hierarchical link: unsupported type combination. Parent: {p}, child: {c}"
                );
                self.summary.links_skipped += 1;
                Ok(())
            }
        }
    }

    async fn create_issue_link(
        &mut self,
        source_iid: u64,
        target_iid: u64,
        link_type: &str,
    ) -> Result<()> {
        let desc = format!("link GL Issue #{source_iid} to #{target_iid} as {link_type}");
        if self
            .retry
            .call(&desc, || {
                self.target.link_issues(source_iid, target_iid, link_type)
            })
            .await?
            .is_some()
        {
            info!("SUCCESS: {desc}");
            self.summary.links_created += 1;
        }
        Ok(())
    }
}
