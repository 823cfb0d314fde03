//! Tracker interface and adapters, spec §4.H: an abstract CRUD/
//! transition/comment contract over external issue systems, plus the
//! push/pull reconciliation that keeps Ralph's task log and the
//! remote tracker in sync.

mod http;
mod mock;
mod push_pull;
mod registry;
mod status_map;

pub use http::HttpTracker;
pub use mock::MockTracker;
pub use push_pull::{pull_from_tracker, push_task_to_tracker, PushPullError};
pub use registry::{build, register, Registry, TrackerFactory};
pub use status_map::{reverse_map_status, ReverseMapSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("tracker returned {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("unknown tracker type: {0}")]
    UnknownType(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// Bearer/OAuth/basic credentials, sourced from environment variables
/// named `RALPH_<TYPE>_TOKEN` (and `_EMAIL` where needed), spec §4.H.
#[derive(Debug, Clone)]
pub enum Auth {
    Bearer(String),
    OAuth(String),
    Basic { username: String, password: String },
}

impl Auth {
    /// Build credentials for `tracker_type` from its conventional
    /// environment variables. Returns `None` if nothing is set — an
    /// unauthenticated tracker (a local mock, say) is a valid case.
    pub fn from_env(tracker_type: &str) -> Option<Self> {
        let prefix = format!("RALPH_{}", tracker_type.to_uppercase());
        let token = std::env::var(format!("{prefix}_TOKEN")).ok();
        let email = std::env::var(format!("{prefix}_EMAIL")).ok();
        match (token, email) {
            (Some(token), Some(email)) => Some(Auth::Basic { username: email, password: token }),
            (Some(token), None) => Some(Auth::Bearer(token)),
            (None, _) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    pub status: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
}

/// A task shape a tracker adapter can turn into a create/update payload,
/// deliberately narrower than [`oplog::Task`] so adapters don't reach
/// into operation-log internals.
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
    pub issue_type: String,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn connect(&self) -> Result<(), TrackerError>;
    async fn disconnect(&self) -> Result<(), TrackerError>;
    async fn health_check(&self) -> Result<bool, TrackerError>;
    async fn create_issue(&self, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError>;
    async fn update_issue(&self, id: &str, update: &IssueUpdate) -> Result<RemoteIssue, TrackerError>;
    async fn get_issue(&self, id: &str) -> Result<RemoteIssue, TrackerError>;
    async fn find_issues(&self, filter: &IssueFilter) -> Result<Vec<RemoteIssue>, TrackerError>;
    async fn create_subtask(&self, parent_id: &str, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError>;
    async fn link_issues(&self, from: &str, to: &str, relation: &str) -> Result<(), TrackerError>;
    async fn transition_issue(&self, id: &str, status_name: &str) -> Result<(), TrackerError>;
    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>, TrackerError>;
    async fn add_comment(&self, id: &str, body: &str) -> Result<(), TrackerError>;

    /// True when this adapter is running in dry-run mode: mutations
    /// short-circuit and queries still execute, spec §4.H.
    fn is_dry_run(&self) -> bool {
        false
    }
}
