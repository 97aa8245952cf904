use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::error::{check_status, ApiError};
use super::TargetApi;
use crate::config::TargetConfig;
use crate::model::target::{Epic, Issue, ItemPayload, Milestone, NotePayload};

/// GitLab REST v4 client, scoped to one project and its owning group
/// (epics are group-level objects).
pub struct GitLabClient {
    api_base: String,
    token: String,
    project_id: u64,
    group_id: u64,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ProjectResponse {
    name_with_namespace: String,
    namespace: NamespaceRef,
}

#[derive(Deserialize)]
struct NamespaceRef {
    id: u64,
    full_path: String,
}

#[derive(Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    markdown: String,
}

impl GitLabClient {
    /// Authenticate and resolve the target project and group. Failure here
    /// is setup-fatal.
    pub async fn connect(cfg: &TargetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.client_timeout_secs))
            .build()
            .context("Failed to build GitLab HTTP client")?;
        let api_base = format!("{}/api/v4", cfg.base_url.trim_end_matches('/'));

        let auth = client
            .get(format!("{api_base}/user"))
            .header("PRIVATE-TOKEN", &cfg.pat)
            .send()
            .await
            .context("GitLab connection failed")?;
        if !auth.status().is_success() {
            anyhow::bail!(
                "GitLab authentication failed (HTTP {}); check base_url and pat",
                auth.status()
            );
        }

        let resp = client
            .get(format!("{api_base}/projects/{}", cfg.project_id))
            .header("PRIVATE-TOKEN", &cfg.pat)
            .send()
            .await
            .context("Failed to fetch GitLab project")?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "GitLab project {} not found (HTTP {})",
                cfg.project_id,
                resp.status()
            );
        }
        let project: ProjectResponse = resp
            .json()
            .await
            .context("Failed to parse GitLab project response")?;
        info!(
            "GitLab connection successful. Target project: {}, group: {}",
            project.name_with_namespace, project.namespace.full_path
        );
        Ok(Self {
            api_base,
            token: cfg.pat.clone(),
            project_id: cfg.project_id,
            group_id: project.namespace.id,
            client,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.api_base))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.api_base))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .put(format!("{}{path}", self.api_base))
            .header("PRIVATE-TOKEN", &self.token)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        check_status(resp)
            .await?
            .json()
            .await
            .map_err(ApiError::from_reqwest)
    }

    fn item_body(payload: &ItemPayload) -> serde_json::Value {
        let mut body = serde_json::json!({
            "title": payload.title,
            "description": payload.description,
            "labels": payload.labels.join(","),
        });
        if let Some(id) = payload.milestone_id {
            body["milestone_id"] = serde_json::json!(id);
        }
        body
    }

    fn note_body(note: &NotePayload) -> serde_json::Value {
        let mut body = serde_json::json!({ "body": note.body });
        if let Some(ts) = note.created_at {
            body["created_at"] = serde_json::json!(ts.to_rfc3339());
        }
        body
    }
}

#[async_trait]
impl TargetApi for GitLabClient {
    async fn get_issue(&self, iid: u64) -> Result<Issue, ApiError> {
        let resp = self
            .get(&format!("/projects/{}/issues/{iid}", self.project_id))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn create_issue(&self, payload: &ItemPayload) -> Result<Issue, ApiError> {
        let resp = self
            .post(&format!("/projects/{}/issues", self.project_id))
            .json(&Self::item_body(payload))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn close_issue(&self, iid: u64) -> Result<(), ApiError> {
        let resp = self
            .put(&format!("/projects/{}/issues/{iid}", self.project_id))
            .json(&serde_json::json!({ "state_event": "close" }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn get_epic(&self, iid: u64) -> Result<Epic, ApiError> {
        let resp = self
            .get(&format!("/groups/{}/epics/{iid}", self.group_id))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn create_epic(&self, payload: &ItemPayload) -> Result<Epic, ApiError> {
        let resp = self
            .post(&format!("/groups/{}/epics", self.group_id))
            .json(&Self::item_body(payload))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn get_label(&self, name: &str) -> Result<String, ApiError> {
        let resp = self
            .get(&format!(
                "/projects/{}/labels/{}",
                self.project_id,
                urlencoding::encode(name)
            ))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let label: LabelResponse = Self::decode(resp).await?;
        Ok(label.name)
    }

    async fn create_label(&self, name: &str, color: &str) -> Result<String, ApiError> {
        let resp = self
            .post(&format!("/projects/{}/labels", self.project_id))
            .json(&serde_json::json!({ "name": name, "color": color }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let label: LabelResponse = Self::decode(resp).await?;
        Ok(label.name)
    }

    async fn list_milestones(&self, search: &str) -> Result<Vec<Milestone>, ApiError> {
        let resp = self
            .get(&format!(
                "/projects/{}/milestones?search={}",
                self.project_id,
                urlencoding::encode(search)
            ))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn create_milestone(
        &self,
        title: &str,
        start_date: Option<&str>,
        due_date: Option<&str>,
    ) -> Result<Milestone, ApiError> {
        let mut body = serde_json::json!({ "title": title });
        if let Some(d) = start_date {
            body["start_date"] = serde_json::json!(d);
        }
        if let Some(d) = due_date {
            body["due_date"] = serde_json::json!(d);
        }
        let resp = self
            .post(&format!("/projects/{}/milestones", self.project_id))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn create_issue_note(
        &self,
        issue_iid: u64,
        note: &NotePayload,
    ) -> Result<(), ApiError> {
        let resp = self
            .post(&format!(
                "/projects/{}/issues/{issue_iid}/notes",
                self.project_id
            ))
            .json(&Self::note_body(note))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn create_epic_note(&self, epic_iid: u64, note: &NotePayload) -> Result<(), ApiError> {
        let resp = self
            .post(&format!("/groups/{}/epics/{epic_iid}/notes", self.group_id))
            .json(&Self::note_body(note))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn link_issues(
        &self,
        source_iid: u64,
        target_iid: u64,
        link_type: &str,
    ) -> Result<(), ApiError> {
        let resp = self
            .post(&format!(
                "/projects/{}/issues/{source_iid}/links",
                self.project_id
            ))
            .json(&serde_json::json!({
                "target_project_id": self.project_id,
                "target_issue_iid": target_iid,
                "link_type": link_type,
            }))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn add_issue_to_epic(
        &self,
        epic_iid: u64,
        issue_global_id: u64,
    ) -> Result<(), ApiError> {
        let resp = self
            .post(&format!(
                "/groups/{}/epics/{epic_iid}/issues/{issue_global_id}",
                self.group_id
            ))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn upload_attachment(&self, filename: &str, bytes: &[u8]) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .post(&format!("/projects/{}/uploads", self.project_id))
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let upload: UploadResponse = Self::decode(resp).await?;
        Ok(upload.markdown)
    }
}
