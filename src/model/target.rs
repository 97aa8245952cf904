use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of item the target system can hold: a container epic or a
/// leaf issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetVariant {
    Epic,
    Issue,
}

impl fmt::Display for TargetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetVariant::Epic => write!(f, "epic"),
            TargetVariant::Issue => write!(f, "issue"),
        }
    }
}

/// An issue as returned by the target API. `iid` is project-local, `id` is
/// the instance-global id (epic/issue linking needs the global one).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Issue {
    pub iid: u64,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Epic {
    pub iid: u64,
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Milestone {
    pub id: u64,
    pub title: String,
}

/// Creation payload shared by issues and epics. Epics ignore the milestone.
#[derive(Debug, Clone, Default)]
pub struct ItemPayload {
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub milestone_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct NotePayload {
    pub body: String,
    /// Original comment timestamp, carried when the target accepts a
    /// caller-supplied creation time.
    pub created_at: Option<DateTime<Utc>>,
}
