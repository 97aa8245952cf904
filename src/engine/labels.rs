use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::clients::TargetApi;
use crate::config::{LabelColorStrategy, LabelConfig};
use crate::model::target::Milestone;

/// Stock label color the target applies when nothing better is configured.
const PLATFORM_DEFAULT_COLOR: &str = "#428BCA";

/// Get-or-create resolution of target taxonomy objects, with per-run
/// caches so each label name and milestone title hits the API at most once.
pub struct LabelResolver {
    color_strategy: LabelColorStrategy,
    fixed_color: String,
    labels: HashMap<String, Option<String>>,
    milestones: HashMap<String, Option<Milestone>>,
}

impl LabelResolver {
    pub fn new(cfg: &LabelConfig) -> Self {
        Self {
            color_strategy: cfg.color_strategy,
            fixed_color: cfg.fixed_color.clone(),
            labels: HashMap::new(),
            milestones: HashMap::new(),
        }
    }

    fn pick_color(&self) -> String {
        match self.color_strategy {
            LabelColorStrategy::Random => {
                let mut bytes = [0u8; 3];
                if getrandom::fill(&mut bytes).is_err() {
                    return self.fixed_color.clone();
                }
                format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
            }
            LabelColorStrategy::Fixed => self.fixed_color.clone(),
            LabelColorStrategy::PlatformDefault => PLATFORM_DEFAULT_COLOR.to_string(),
        }
    }

    /// Returns the resolved label name, or `None` when the label could not
    /// be obtained (logged; the item proceeds with fewer labels).
    pub async fn get_or_create_label(
        &mut self,
        target: &dyn TargetApi,
        retry: &RetryPolicy,
        name: &str,
    ) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            debug!("Attempted to get/create label with empty name. Skipping.");
            return None;
        }
        if let Some(cached) = self.labels.get(name) {
            return cached.clone();
        }
        let resolved = resolve_label(target, retry, name, &self.pick_color()).await;
        self.labels.insert(name.to_string(), resolved.clone());
        resolved
    }

    /// Returns the resolved milestone, or `None` when resolution failed
    /// (logged; the item proceeds without a milestone).
    pub async fn get_or_create_milestone(
        &mut self,
        target: &dyn TargetApi,
        retry: &RetryPolicy,
        title: &str,
        start_date: Option<&str>,
        due_date: Option<&str>,
    ) -> Option<Milestone> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        if let Some(cached) = self.milestones.get(title) {
            return cached.clone();
        }
        let resolved = resolve_milestone(target, retry, title, start_date, due_date).await;
        self.milestones.insert(title.to_string(), resolved.clone());
        resolved
    }
}

async fn resolve_label(
    target: &dyn TargetApi,
    retry: &RetryPolicy,
    name: &str,
    color: &str,
) -> Option<String> {
    match retry
        .call(&format!("get label '{name}'"), || target.get_label(name))
        .await
    {
        Ok(Some(existing)) => {
            debug!("Label '{name}' already exists.");
            Some(existing)
        }
        Ok(None) => Some(name.to_string()),
        Err(e) if e.is_not_found() => {
            debug!("Label '{name}' not found. Attempting to create.");
            match retry
                .call(&format!("create label '{name}'"), || {
                    target.create_label(name, color)
                })
                .await
            {
                Ok(Some(created)) => {
                    info!("Created label: {created}");
                    Some(created)
                }
                // Lost a create race; the label exists now.
                Ok(None) => Some(name.to_string()),
                Err(e) => {
                    warn!("Could not create label '{name}' after retries: {e}. Skipping.");
                    None
                }
            }
        }
        Err(e) => {
            warn!("Error getting label '{name}': {e}. Skipping.");
            None
        }
    }
}

async fn resolve_milestone(
    target: &dyn TargetApi,
    retry: &RetryPolicy,
    title: &str,
    start_date: Option<&str>,
    due_date: Option<&str>,
) -> Option<Milestone> {
    let listed = match retry
        .call(&format!("list milestones matching '{title}'"), || {
            target.list_milestones(title)
        })
        .await
    {
        Ok(Some(listed)) => listed,
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Could not list milestones for '{title}': {e}. Skipping.");
            return None;
        }
    };
    // The search term is a substring pre-filter, not authoritative.
    if let Some(found) = listed.into_iter().find(|m| m.title == title) {
        debug!("Milestone '{title}' already exists (ID: {}).", found.id);
        return Some(found);
    }

    let start = start_date.and_then(|d| validated_day(d, "start", title));
    let due = due_date.and_then(|d| validated_day(d, "due", title));
    match retry
        .call(&format!("create milestone '{title}'"), || {
            target.create_milestone(title, start.as_deref(), due.as_deref())
        })
        .await
    {
        Ok(Some(created)) => {
            info!("Created milestone '{title}' (ID: {})", created.id);
            Some(created)
        }
        // Duplicate signal means a concurrent create won; one re-list
        // should surface it.
        Ok(None) => match retry
            .call(&format!("re-list milestones matching '{title}'"), || {
                target.list_milestones(title)
            })
            .await
        {
            Ok(Some(listed)) => listed.into_iter().find(|m| m.title == title),
            _ => None,
        },
        Err(e) => {
            warn!("Could not create milestone '{title}': {e}. Skipping.");
            None
        }
    }
}

/// Milestones proceed without an invalid date rather than failing outright.
fn validated_day(raw: &str, which: &str, title: &str) -> Option<String> {
    match chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(_) => Some(raw.to_string()),
        Err(_) => {
            warn!("Ignoring malformed {which} date '{raw}' for milestone '{title}'");
            None
        }
    }
}
