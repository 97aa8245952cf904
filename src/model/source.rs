use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A work item as fetched from the source system, decoded once at the
/// client boundary. `rich_fields` holds the configured rich-text (HTML)
/// fields keyed by field reference name.
#[derive(Debug, Clone, Default)]
pub struct SourceItem {
    pub id: i64,
    pub item_type: String,
    pub state: String,
    pub title: String,
    pub rich_fields: HashMap<String, String>,
    /// Semicolon-delimited tag string, as the source stores it.
    pub tags: String,
    pub area_path: String,
    pub iteration_path: String,
    pub priority: Option<i64>,
    pub created_by: Option<SourceIdentity>,
    pub created_date: Option<DateTime<Utc>>,
    /// Only populated when the fetch requested relation expansion.
    pub relations: Vec<SourceRelation>,
}

/// A comment on a source work item.
#[derive(Debug, Clone)]
pub struct SourceComment {
    pub id: i64,
    /// Rich-text body (HTML).
    pub text: String,
    pub created_by: Option<SourceIdentity>,
    pub created_date: Option<DateTime<Utc>>,
}

/// A directed relation edge hanging off a source work item.
#[derive(Debug, Clone)]
pub struct SourceRelation {
    /// Link type reference name, e.g. `System.LinkTypes.Hierarchy-Forward`.
    pub rel: String,
    /// Reference URL; the target work item id is embedded in it.
    pub url: String,
    /// Human-readable link name when the source supplies one.
    pub name: Option<String>,
}

/// Who authored an item or comment in the source system.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceIdentity {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "uniqueName")]
    pub unique_name: Option<String>,
}

/// Area/iteration tree node metadata. Dates are kept as the raw ISO strings
/// the source returns; conversion to day granularity happens downstream.
#[derive(Debug, Clone)]
pub struct ClassificationNode {
    pub name: String,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
}
