use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::target::TargetVariant;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub types: TypeConfig,
    #[serde(default)]
    pub states: StateMapConfig,
    #[serde(default)]
    pub priorities: PriorityConfig,
    #[serde(default)]
    pub tags: TagConfig,
    #[serde(default)]
    pub areas: AreaConfig,
    #[serde(default)]
    pub milestones: MilestoneConfig,
    #[serde(default)]
    pub comments: CommentConfig,
    #[serde(default)]
    pub users: UserConfig,
    #[serde(default)]
    pub links: LinkConfig,
    #[serde(default)]
    pub labels: LabelConfig,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub org_url: String,
    pub project: String,
    pub pat: String,
    #[serde(default = "default_batch_fetch_size")]
    pub batch_fetch_size: usize,
    #[serde(default = "default_description_fields")]
    pub description_fields: Vec<String>,
    pub priority_field: Option<String>,
    #[serde(default = "default_image_timeout")]
    pub image_download_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    pub base_url: String,
    pub pat: String,
    pub project_id: u64,
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TypeConfig {
    /// Source work item type → target variant.
    #[serde(default)]
    pub map: HashMap<String, TargetVariant>,
    #[serde(default = "default_variant")]
    pub default: TargetVariant,
}

impl Default for TypeConfig {
    fn default() -> Self {
        TypeConfig {
            map: HashMap::new(),
            default: default_variant(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateMapConfig {
    #[serde(default = "default_state_prefix")]
    pub unmapped_prefix: String,
    #[serde(default)]
    pub map: HashMap<String, StateRule>,
}

impl Default for StateMapConfig {
    fn default() -> Self {
        StateMapConfig {
            unmapped_prefix: default_state_prefix(),
            map: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct StateRule {
    #[serde(default)]
    pub labels: Vec<String>,
    /// When set, issues translated under this state are closed after creation.
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Deserialize)]
pub struct PriorityConfig {
    /// Priority ordinal (as a string key, TOML table keys are strings) → label name.
    #[serde(default)]
    pub map: HashMap<String, String>,
    #[serde(default = "default_priority_prefix")]
    pub unmapped_prefix: String,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        PriorityConfig {
            map: HashMap::new(),
            unmapped_prefix: default_priority_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TagConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct AreaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_area_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub strategy: AreaPathStrategy,
    /// Separator between path levels in the source system.
    #[serde(default = "default_level_separator")]
    pub level_separator: String,
    /// Separator used when joining segments into a target label name.
    #[serde(default = "default_label_separator")]
    pub label_separator: String,
}

impl Default for AreaConfig {
    fn default() -> Self {
        AreaConfig {
            enabled: false,
            prefix: default_area_prefix(),
            strategy: AreaPathStrategy::default(),
            level_separator: default_level_separator(),
            label_separator: default_label_separator(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AreaPathStrategy {
    #[default]
    LastSegmentOnly,
    FullPath,
    AllSegments,
    AllSegmentsHierarchical,
}

#[derive(Debug, Deserialize, Default)]
pub struct MilestoneConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Exact iteration path → milestone title overrides.
    #[serde(default)]
    pub title_overrides: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub migrate_images: bool,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    /// Substituted for an image that could not be migrated; `{url}` expands
    /// to the original source URL.
    #[serde(default = "default_image_placeholder")]
    pub image_placeholder: String,
    /// Prepended to every migrated comment; `{author}` and `{timestamp}`
    /// expand to the resolved source author and UTC creation time.
    #[serde(default = "default_header_format")]
    pub header_format: String,
}

impl Default for CommentConfig {
    fn default() -> Self {
        CommentConfig {
            enabled: false,
            migrate_images: false,
            max_image_bytes: default_max_image_bytes(),
            image_placeholder: default_image_placeholder(),
            header_format: default_header_format(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct UserConfig {
    /// Source unique or display name → target username.
    #[serde(default)]
    pub map: HashMap<String, String>,
    /// Fallback target username; empty means no fallback.
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct LinkConfig {
    /// Source relation reference name → target link type. An empty-string
    /// value marks the relation type as explicitly ignored (TOML has no
    /// null), which is logged; an absent key is skipped silently.
    #[serde(default)]
    pub map: HashMap<String, String>,
    /// Link type applied to unmapped relation types; empty means none.
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelConfig {
    #[serde(default)]
    pub color_strategy: LabelColorStrategy,
    #[serde(default = "default_fixed_color")]
    pub fixed_color: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig {
            color_strategy: LabelColorStrategy::default(),
            fixed_color: default_fixed_color(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelColorStrategy {
    #[default]
    Random,
    Fixed,
    PlatformDefault,
}

fn default_batch_fetch_size() -> usize {
    100
}
fn default_description_fields() -> Vec<String> {
    vec!["System.Description".to_string()]
}
fn default_image_timeout() -> u64 {
    30
}
fn default_client_timeout() -> u64 {
    60
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_variant() -> TargetVariant {
    TargetVariant::Issue
}
fn default_state_prefix() -> String {
    "ado_state::".to_string()
}
fn default_priority_prefix() -> String {
    "ado_priority::".to_string()
}
fn default_area_prefix() -> String {
    "area::".to_string()
}
fn default_level_separator() -> String {
    "\\".to_string()
}
fn default_label_separator() -> String {
    "::".to_string()
}
fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_image_placeholder() -> String {
    "[Image: {url} - Migration Failed]".to_string()
}
fn default_header_format() -> String {
    "**Comment from ADO by {author} on {timestamp}:**\n\n".to_string()
}
fn default_fixed_color() -> String {
    "#C0C0C0".to_string()
}

impl AppConfig {
    /// File names for persisted state are derived from the source project
    /// name so one directory can hold state for several migrations.
    pub fn map_file_path(&self) -> PathBuf {
        self.state
            .dir
            .join(format!("{}_ado_gitlab_map.json", self.safe_project_name()))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state
            .dir
            .join(format!("{}_checkpoint.json", self.safe_project_name()))
    }

    fn safe_project_name(&self) -> String {
        let name: String = self
            .source
            .project
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() {
            "default_project".to_string()
        } else {
            name
        }
    }
}

fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(p) = explicit {
        return vec![p.to_path_buf()];
    }
    let mut candidates = vec![PathBuf::from("migration.toml")];
    if let Some(base) = dirs::config_dir() {
        candidates.push(base.join("ado2gitlab").join("config.toml"));
    }
    candidates
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let candidates = candidate_paths(explicit);
    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        bail!(
            "No configuration file found (looked for {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}
