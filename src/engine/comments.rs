use anyhow::Result;
use tracing::{error, info, warn};

use super::media;
use super::{Migrator, TargetRef};
use crate::config::UserConfig;
use crate::model::source::{SourceComment, SourceIdentity, SourceItem};
use crate::model::target::{NotePayload, TargetVariant};
use crate::util::html::html_to_markdown;

impl Migrator<'_> {
    /// Replay all source comments onto the resolved target item, in
    /// ascending chronological order. Failures degrade per comment.
    pub(crate) async fn migrate_comments(&mut self, item: &SourceItem, target_ref: &TargetRef) {
        info!(
            "Fetching comments for ADO #{} (GitLab {} #{})...",
            item.id, target_ref.variant, target_ref.iid
        );
        let mut comments = match self.source.fetch_comments(item.id).await {
            Ok(comments) => comments,
            Err(e) => {
                error!("Failed to fetch comments for ADO #{}: {e}", item.id);
                return;
            }
        };
        if comments.is_empty() {
            info!("No comments found in ADO for #{} to migrate.", item.id);
            return;
        }
        info!(
            "Found {} comments in ADO for #{}. Migrating...",
            comments.len(),
            item.id
        );
        comments.sort_by_key(|c| c.created_date);
        for comment in &comments {
            match self.migrate_one_comment(item, target_ref, comment).await {
                Ok(true) => self.summary.comments_migrated += 1,
                Ok(false) => self.summary.comments_failed += 1,
                Err(e) => {
                    warn!(
                        "Error processing ADO comment {} for #{}: {e:#}",
                        comment.id, item.id
                    );
                    self.summary.comments_failed += 1;
                }
            }
        }
    }

    async fn migrate_one_comment(
        &mut self,
        item: &SourceItem,
        target_ref: &TargetRef,
        comment: &SourceComment,
    ) -> Result<bool> {
        let mut html = comment.text.clone();
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
        let body_md = html_to_markdown(&html);

        // The item's own author/timestamp serve as fallbacks when the
        // comment record is missing them.
        let author = user_representation(
            comment.created_by.as_ref().or(item.created_by.as_ref()),
            &self.cfg.users,
        );
        let Some(timestamp) = comment.created_date.or(item.created_date) else {
            warn!(
                "Could not determine timestamp for ADO comment {}. Skipping note creation.",
                comment.id
            );
            return Ok(false);
        };
        let timestamp_str = timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let header = self
            .cfg
            .comments
            .header_format
            .replace("{author}", &author)
            .replace("{timestamp}", &timestamp_str);
        let note = NotePayload {
            body: format!("{header}{body_md}"),
            created_at: Some(timestamp),
        };

        let desc = format!(
            "add ADO comment {} to GitLab {} #{}",
            comment.id, target_ref.variant, target_ref.iid
        );
        match target_ref.variant {
            TargetVariant::Issue => {
                self.retry
                    .call(&desc, || self.target.create_issue_note(target_ref.iid, &note))
                    .await?
            }
            TargetVariant::Epic => {
                self.retry
                    .call(&desc, || self.target.create_epic_note(target_ref.iid, &note))
                    .await?
            }
        };
        Ok(true)
    }
}

/// Render a source identity for the comment header, resolved through the
/// configured user map with a default fallback.
pub fn user_representation(identity: Option<&SourceIdentity>, cfg: &UserConfig) -> String {
    let Some(identity) = identity else {
        return "Unknown ADO User".to_string();
    };
    let display = if identity.display_name.is_empty() {
        "Unknown Name"
    } else {
        identity.display_name.as_str()
    };
    let unique = identity.unique_name.as_deref();

    let mapped = unique
        .and_then(|u| cfg.map.get(u))
        .or_else(|| cfg.map.get(display));
    if let Some(target_user) = mapped {
        return format!("GitLab user '{target_user}' (ADO: {display})");
    }
    if !cfg.default.is_empty() {
        return format!("'{}' (Original ADO user: {display})", cfg.default);
    }
    let mut repr = format!("ADO user: {display}");
    if let Some(u) = unique {
        if !u.eq_ignore_ascii_case(display) {
            repr.push_str(&format!(" [{u}]"));
        }
    }
    repr
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn identity(display: &str, unique: Option<&str>) -> SourceIdentity {
        SourceIdentity {
            display_name: display.to_string(),
            unique_name: unique.map(String::from),
        }
    }

    fn user_cfg(map: &[(&str, &str)], default: &str) -> UserConfig {
        UserConfig {
            map: map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            default: default.to_string(),
        }
    }

    #[test]
    fn missing_identity_is_unknown_user() {
        assert_eq!(
            user_representation(None, &UserConfig::default()),
            "Unknown ADO User"
        );
    }

    #[test]
    fn unique_name_mapping_wins() {
        let cfg = user_cfg(&[("alice@example.com", "alice"), ("Alice Smith", "wrong")], "");
        let id = identity("Alice Smith", Some("alice@example.com"));
        assert_eq!(
            user_representation(Some(&id), &cfg),
            "GitLab user 'alice' (ADO: Alice Smith)"
        );
    }

    #[test]
    fn display_name_mapping_is_the_fallback_lookup() {
        let cfg = user_cfg(&[("Bob Jones", "bob")], "");
        let id = identity("Bob Jones", Some("bob@corp.example"));
        assert_eq!(
            user_representation(Some(&id), &cfg),
            "GitLab user 'bob' (ADO: Bob Jones)"
        );
    }

    #[test]
    fn default_user_applies_when_unmapped() {
        let cfg = user_cfg(&[], "migration-bot");
        let id = identity("Carol", Some("carol@corp.example"));
        assert_eq!(
            user_representation(Some(&id), &cfg),
            "'migration-bot' (Original ADO user: Carol)"
        );
    }

    #[test]
    fn unmapped_without_default_shows_raw_identity() {
        let cfg = user_cfg(&[], "");
        let id = identity("Dan", Some("dan@corp.example"));
        assert_eq!(
            user_representation(Some(&id), &cfg),
            "ADO user: Dan [dan@corp.example]"
        );
        // The unique name is omitted when it just repeats the display name.
        let same = identity("dan@corp.example", Some("dan@corp.example"));
        assert_eq!(
            user_representation(Some(&same), &cfg),
            "ADO user: dan@corp.example"
        );
    }

    #[test]
    fn empty_display_name_degrades_gracefully() {
        let cfg = user_cfg(&[], "");
        let id = identity("", None);
        assert_eq!(user_representation(Some(&id), &cfg), "ADO user: Unknown Name");
    }
}
