//! Mock source/target clients for engine tests, with call recording.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::clients::error::ApiError;
use crate::clients::{DownloadedImage, NodeKind, SourceApi, TargetApi};
use crate::model::source::{ClassificationNode, SourceComment, SourceItem};
use crate::model::target::{Epic, Issue, ItemPayload, Milestone, NotePayload};

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("404 {what} Not Found"),
    }
}

fn duplicate(message: &str) -> ApiError {
    ApiError::Status {
        status: 409,
        message: message.to_string(),
    }
}

#[derive(Default)]
pub struct MockSource {
    pub items: Vec<SourceItem>,
    pub comments: HashMap<i64, Vec<SourceComment>>,
    pub nodes: HashMap<String, ClassificationNode>,
    pub images: HashMap<String, Vec<u8>>,
    pub node_calls: AtomicU32,
    pub fail_comment_fetch: bool,
}

#[async_trait]
impl SourceApi for MockSource {
    async fn query_item_ids(&self) -> Result<Vec<i64>, ApiError> {
        Ok(self.items.iter().map(|i| i.id).collect())
    }

    async fn fetch_items(
        &self,
        ids: &[i64],
        _fields: &[String],
        expand_relations: bool,
    ) -> Result<Vec<SourceItem>, ApiError> {
        Ok(self
            .items
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .map(|mut item| {
                if !expand_relations {
                    item.relations.clear();
                }
                item
            })
            .collect())
    }

    async fn fetch_comments(&self, item_id: i64) -> Result<Vec<SourceComment>, ApiError> {
        if self.fail_comment_fetch {
            return Err(ApiError::Transport("comment fetch refused".into()));
        }
        let mut comments = self.comments.get(&item_id).cloned().unwrap_or_default();
        comments.sort_by_key(|c| c.created_date);
        Ok(comments)
    }

    async fn classification_node(
        &self,
        _kind: NodeKind,
        path: &str,
    ) -> Result<Option<ClassificationNode>, ApiError> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nodes.get(path).cloned())
    }

    async fn download_image(
        &self,
        url: &str,
        _max_bytes: u64,
    ) -> Result<DownloadedImage, ApiError> {
        match self.images.get(url) {
            Some(bytes) => Ok(DownloadedImage {
                filename: url.rsplit('/').next().map(String::from),
                bytes: bytes.clone(),
                content_type: "image/png".to_string(),
            }),
            None => Err(not_found("Attachment")),
        }
    }
}

#[derive(Default)]
pub struct MockTarget {
    pub next_iid: AtomicU64,
    pub next_milestone_id: AtomicU64,
    pub issues_created: Mutex<Vec<ItemPayload>>,
    pub epics_created: Mutex<Vec<ItemPayload>>,
    pub closed_issues: Mutex<Vec<u64>>,
    pub existing_labels: Mutex<HashSet<String>>,
    pub labels_created: Mutex<Vec<(String, String)>>,
    pub label_get_calls: AtomicU32,
    pub milestones: Mutex<Vec<Milestone>>,
    pub milestone_create_calls: AtomicU32,
    pub issue_notes: Mutex<Vec<(u64, NotePayload)>>,
    pub epic_notes: Mutex<Vec<(u64, NotePayload)>>,
    pub issue_links: Mutex<HashSet<(u64, u64, String)>>,
    pub epic_issue_links: Mutex<HashSet<(u64, u64)>>,
    pub link_calls: AtomicU32,
    pub uploads: Mutex<Vec<String>>,
    /// Simulate a lost create race: milestone creates fail with a duplicate
    /// message while the milestone appears in subsequent listings.
    pub milestone_create_races: bool,
    /// Item creates report duplicates (already-migrated target state).
    pub item_creates_are_duplicates: bool,
    pub fail_label_creates: bool,
}

impl MockTarget {
    pub fn new() -> Self {
        Self {
            next_iid: AtomicU64::new(1),
            next_milestone_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn issue_note_bodies(&self) -> Vec<String> {
        self.issue_notes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, n)| n.body.clone())
            .collect()
    }
}

#[async_trait]
impl TargetApi for MockTarget {
    async fn get_issue(&self, iid: u64) -> Result<Issue, ApiError> {
        Ok(Issue {
            iid,
            id: iid + 1000,
        })
    }

    async fn create_issue(&self, payload: &ItemPayload) -> Result<Issue, ApiError> {
        if self.item_creates_are_duplicates {
            return Err(duplicate("Title has already been taken"));
        }
        self.issues_created.lock().unwrap().push(payload.clone());
        let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
        Ok(Issue {
            iid,
            id: iid + 1000,
        })
    }

    async fn close_issue(&self, iid: u64) -> Result<(), ApiError> {
        self.closed_issues.lock().unwrap().push(iid);
        Ok(())
    }

    async fn get_epic(&self, iid: u64) -> Result<Epic, ApiError> {
        Ok(Epic {
            iid,
            id: iid + 2000,
        })
    }

    async fn create_epic(&self, payload: &ItemPayload) -> Result<Epic, ApiError> {
        if self.item_creates_are_duplicates {
            return Err(duplicate("Title has already been taken"));
        }
        self.epics_created.lock().unwrap().push(payload.clone());
        let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
        Ok(Epic {
            iid,
            id: iid + 2000,
        })
    }

    async fn get_label(&self, name: &str) -> Result<String, ApiError> {
        self.label_get_calls.fetch_add(1, Ordering::SeqCst);
        if self.existing_labels.lock().unwrap().contains(name) {
            Ok(name.to_string())
        } else {
            Err(not_found("Label"))
        }
    }

    async fn create_label(&self, name: &str, color: &str) -> Result<String, ApiError> {
        if self.fail_label_creates {
            return Err(ApiError::Status {
                status: 400,
                message: "color is invalid".to_string(),
            });
        }
        self.labels_created
            .lock()
            .unwrap()
            .push((name.to_string(), color.to_string()));
        self.existing_labels.lock().unwrap().insert(name.to_string());
        Ok(name.to_string())
    }

    async fn list_milestones(&self, search: &str) -> Result<Vec<Milestone>, ApiError> {
        Ok(self
            .milestones
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.title.contains(search))
            .cloned()
            .collect())
    }

    async fn create_milestone(
        &self,
        title: &str,
        _start_date: Option<&str>,
        _due_date: Option<&str>,
    ) -> Result<Milestone, ApiError> {
        self.milestone_create_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_milestone_id.fetch_add(1, Ordering::SeqCst);
        let milestone = Milestone {
            id,
            title: title.to_string(),
        };
        self.milestones.lock().unwrap().push(milestone.clone());
        if self.milestone_create_races {
            return Err(duplicate("Title has already been taken"));
        }
        Ok(milestone)
    }

    async fn create_issue_note(
        &self,
        issue_iid: u64,
        note: &NotePayload,
    ) -> Result<(), ApiError> {
        self.issue_notes
            .lock()
            .unwrap()
            .push((issue_iid, note.clone()));
        Ok(())
    }

    async fn create_epic_note(&self, epic_iid: u64, note: &NotePayload) -> Result<(), ApiError> {
        self.epic_notes
            .lock()
            .unwrap()
            .push((epic_iid, note.clone()));
        Ok(())
    }

    async fn link_issues(
        &self,
        source_iid: u64,
        target_iid: u64,
        link_type: &str,
    ) -> Result<(), ApiError> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        let inserted = self.issue_links.lock().unwrap().insert((
            source_iid,
            target_iid,
            link_type.to_string(),
        ));
        if inserted {
            Ok(())
        } else {
            Err(duplicate("issues are already related"))
        }
    }

    async fn add_issue_to_epic(
        &self,
        epic_iid: u64,
        issue_global_id: u64,
    ) -> Result<(), ApiError> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        let inserted = self
            .epic_issue_links
            .lock()
            .unwrap()
            .insert((epic_iid, issue_global_id));
        if inserted {
            Ok(())
        } else {
            Err(duplicate("Issue(s) already assigned"))
        }
    }

    async fn upload_attachment(&self, filename: &str, _bytes: &[u8]) -> Result<String, ApiError> {
        self.uploads.lock().unwrap().push(filename.to_string());
        Ok(format!("![{filename}](/uploads/abc123/{filename})"))
    }
}
