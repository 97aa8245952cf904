use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{check_status, ApiError};
use super::{DownloadedImage, NodeKind, SourceApi};
use crate::config::SourceConfig;
use crate::model::source::{
    ClassificationNode, SourceComment, SourceIdentity, SourceItem, SourceRelation,
};

const API_VERSION: &str = "7.0";
const COMMENTS_API_VERSION: &str = "7.0-preview.3";
const COMMENTS_PAGE_SIZE: u32 = 200;

/// Azure DevOps REST client. PAT auth, work-item-tracking endpoints only.
pub struct AdoClient {
    base_url: String,
    project: String,
    auth_header: String,
    client: reqwest::Client,
    description_fields: Vec<String>,
    priority_field: Option<String>,
    image_timeout: Duration,
}

impl AdoClient {
    /// Build the client and verify the organization/project are reachable.
    /// Failure here is setup-fatal.
    pub async fn connect(cfg: &SourceConfig) -> Result<Self> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!(":{}", cfg.pat));
        let ado = Self {
            base_url: cfg.org_url.trim_end_matches('/').to_string(),
            project: cfg.project.clone(),
            auth_header: format!("Basic {encoded}"),
            client: reqwest::Client::new(),
            description_fields: cfg.description_fields.clone(),
            priority_field: cfg.priority_field.clone(),
            image_timeout: Duration::from_secs(cfg.image_download_timeout_secs),
        };

        let url = format!(
            "{}/_apis/projects/{}?api-version={API_VERSION}",
            ado.base_url,
            urlencoding::encode(&ado.project)
        );
        let resp = ado
            .client
            .get(&url)
            .header("Authorization", &ado.auth_header)
            .send()
            .await
            .context("Azure DevOps connection failed")?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "Failed to verify ADO project '{}': HTTP {}",
                ado.project,
                resp.status()
            );
        }
        let details: ProjectResponse = resp
            .json()
            .await
            .context("Failed to parse ADO project response")?;
        info!(
            "Azure DevOps project verified: {} (ID: {})",
            details.name, details.id
        );
        Ok(ado)
    }

    fn decode_item(&self, raw: RawItem) -> SourceItem {
        let fields = raw.fields;
        let mut rich_fields = HashMap::new();
        for field_ref in &self.description_fields {
            if let Some(Value::String(html)) = fields.get(field_ref) {
                rich_fields.insert(field_ref.clone(), html.clone());
            }
        }
        let priority = self.priority_field.as_ref().and_then(|f| {
            fields.get(f).and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
        });
        let created_by = fields
            .get("System.CreatedBy")
            .cloned()
            .and_then(|v| serde_json::from_value::<SourceIdentity>(v).ok());
        let created_date = str_field(&fields, "System.CreatedDate")
            .as_deref()
            .and_then(parse_utc);

        SourceItem {
            id: raw.id,
            item_type: str_field(&fields, "System.WorkItemType").unwrap_or_default(),
            state: str_field(&fields, "System.State").unwrap_or_default(),
            title: str_field(&fields, "System.Title").unwrap_or_default(),
            rich_fields,
            tags: str_field(&fields, "System.Tags").unwrap_or_default(),
            area_path: str_field(&fields, "System.AreaPath").unwrap_or_default(),
            iteration_path: str_field(&fields, "System.IterationPath").unwrap_or_default(),
            priority,
            created_by,
            created_date,
            relations: raw
                .relations
                .into_iter()
                .map(|r| SourceRelation {
                    name: r
                        .attributes
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    rel: r.rel,
                    url: r.url,
                })
                .collect(),
        }
    }
}

fn str_field(fields: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(|v| v.as_str()).map(String::from)
}

fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Deserialize)]
struct ProjectResponse {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WiqlRef>,
}

#[derive(Deserialize)]
struct WiqlRef {
    id: i64,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    value: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    id: i64,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

#[derive(Deserialize)]
struct RawRelation {
    rel: String,
    url: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct CommentsResponse {
    #[serde(default)]
    comments: Vec<RawComment>,
    #[serde(rename = "continuationToken")]
    continuation_token: Option<String>,
}

#[derive(Deserialize)]
struct RawComment {
    id: i64,
    #[serde(default)]
    text: String,
    #[serde(rename = "createdBy")]
    created_by: Option<SourceIdentity>,
    #[serde(rename = "createdDate")]
    created_date: Option<String>,
}

#[derive(Deserialize)]
struct NodeResponse {
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, Value>,
}

#[async_trait]
impl SourceApi for AdoClient {
    async fn query_item_ids(&self) -> Result<Vec<i64>, ApiError> {
        // WIQL string literals escape single quotes by doubling them.
        let project = self.project.replace('\'', "''");
        let wiql = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{project}'"
        );
        debug!("Executing WIQL query: {wiql}");
        let url = format!(
            "{}/{}/_apis/wit/wiql?api-version={API_VERSION}",
            self.base_url,
            urlencoding::encode(&self.project)
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&serde_json::json!({ "query": wiql }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let wiql_result: WiqlResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(ApiError::from_reqwest)?;
        Ok(wiql_result.work_items.into_iter().map(|r| r.id).collect())
    }

    async fn fetch_items(
        &self,
        ids: &[i64],
        fields: &[String],
        expand_relations: bool,
    ) -> Result<Vec<SourceItem>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        // The batch API rejects a field list combined with relation
        // expansion, so the field list is dropped when relations are on.
        let body = if expand_relations {
            serde_json::json!({
                "ids": ids,
                "$expand": "relations",
                "errorPolicy": "omit",
            })
        } else {
            serde_json::json!({
                "ids": ids,
                "fields": fields,
                "errorPolicy": "omit",
            })
        };
        let url = format!(
            "{}/_apis/wit/workitemsbatch?api-version={API_VERSION}",
            self.base_url
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let batch: BatchResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(ApiError::from_reqwest)?;
        Ok(batch
            .value
            .into_iter()
            .map(|raw| self.decode_item(raw))
            .collect())
    }

    async fn fetch_comments(&self, item_id: i64) -> Result<Vec<SourceComment>, ApiError> {
        let mut comments = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/{}/_apis/wit/workItems/{item_id}/comments?api-version={COMMENTS_API_VERSION}&$top={COMMENTS_PAGE_SIZE}&order=asc",
                self.base_url,
                urlencoding::encode(&self.project)
            );
            if let Some(t) = &token {
                url.push_str(&format!("&continuationToken={}", urlencoding::encode(t)));
            }
            let resp = self
                .client
                .get(&url)
                .header("Authorization", &self.auth_header)
                .send()
                .await
                .map_err(ApiError::from_reqwest)?;
            let page: CommentsResponse = check_status(resp)
                .await?
                .json()
                .await
                .map_err(ApiError::from_reqwest)?;
            comments.extend(page.comments.into_iter().map(|c| SourceComment {
                id: c.id,
                text: c.text,
                created_by: c.created_by,
                created_date: c.created_date.as_deref().and_then(parse_utc),
            }));
            match page.continuation_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        comments.sort_by_key(|c| c.created_date);
        Ok(comments)
    }

    async fn classification_node(
        &self,
        kind: NodeKind,
        path: &str,
    ) -> Result<Option<ClassificationNode>, ApiError> {
        let separator = '\\';
        let mut segments: Vec<&str> = path
            .split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        // The leading segment repeats the project name; the node API wants
        // the path relative to the tree root.
        if segments
            .first()
            .is_some_and(|s| s.eq_ignore_ascii_case(&self.project))
        {
            segments.remove(0);
        }
        if segments.is_empty() {
            warn!(
                "Classification path '{path}' refers to the project root, not a {} node",
                kind.as_str()
            );
            return Ok(None);
        }
        let encoded_path: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        let url = format!(
            "{}/{}/_apis/wit/classificationnodes/{}/{}?api-version={API_VERSION}&$depth=0",
            self.base_url,
            urlencoding::encode(&self.project),
            kind.as_str(),
            encoded_path.join("/")
        );
        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let node: NodeResponse = match check_status(resp).await {
            Ok(resp) => resp.json().await.map_err(ApiError::from_reqwest)?,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let attr_str = |name: &str| {
            node.attributes
                .get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        Ok(Some(ClassificationNode {
            start_date: attr_str("startDate"),
            finish_date: attr_str("finishDate"),
            name: node.name,
        }))
    }

    async fn download_image(
        &self,
        url: &str,
        max_bytes: u64,
    ) -> Result<DownloadedImage, ApiError> {
        debug!("Downloading image from source: {url}");
        let resp = self
            .client
            .get(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/octet-stream")
            .timeout(self.image_timeout)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let resp = check_status(resp).await?;

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        // An HTML body means an auth redirect or error page, not an image.
        if content_type.contains("html") {
            return Err(ApiError::Decode(format!(
                "image download returned HTML (Content-Type: {content_type})"
            )));
        }
        if let Some(len) = resp.content_length() {
            if len > max_bytes {
                return Err(ApiError::Decode(format!(
                    "image is {len} bytes, over the {max_bytes} byte cap"
                )));
            }
        }
        let filename = resp
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url));

        let bytes = resp.bytes().await.map_err(ApiError::from_reqwest)?;
        if bytes.is_empty() {
            return Err(ApiError::Decode("image downloaded 0 bytes".into()));
        }
        if bytes.len() as u64 > max_bytes {
            return Err(ApiError::Decode(format!(
                "image is {} bytes, over the {max_bytes} byte cap",
                bytes.len()
            )));
        }
        Ok(DownloadedImage {
            filename,
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn filename_from_disposition(disposition: &str) -> Option<String> {
    let re = Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid regex");
    let name = re.captures(disposition)?.get(1)?.as_str().trim();
    let decoded = urlencoding::decode(name).ok()?;
    let decoded = decoded.trim_matches(|c| c == '"' || c == '\'');
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}

fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    let decoded = urlencoding::decode(name).ok()?;
    if decoded.is_empty() || !decoded.contains('.') {
        None
    } else {
        Some(decoded.into_owned())
    }
}
