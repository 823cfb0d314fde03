//! An in-memory tracker, grounded on the [`crate::agent::mock::MockAgent`]
//! pattern. Used by tests and by the `mock` tracker type in the
//! registry so the crate is runnable without a real issue system.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{IssueDraft, IssueFilter, IssueUpdate, RemoteIssue, Transition, Tracker, TrackerError};

pub struct MockTracker {
    issues: Mutex<HashMap<String, RemoteIssue>>,
    next_id: AtomicU64,
}

impl Default for MockTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTracker {
    pub fn new() -> Self {
        Self { issues: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    pub fn seed(&self, issue: RemoteIssue) {
        self.issues.lock().expect("mock tracker poisoned").insert(issue.id.clone(), issue);
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn connect(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, TrackerError> {
        Ok(true)
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError> {
        let id = format!("MOCK-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let issue = RemoteIssue {
            id: id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            status: "open".to_string(),
            url: Some(format!("mock://issues/{id}")),
        };
        self.issues.lock().expect("mock tracker poisoned").insert(id, issue.clone());
        Ok(issue)
    }

    async fn update_issue(&self, id: &str, update: &IssueUpdate) -> Result<RemoteIssue, TrackerError> {
        let mut issues = self.issues.lock().expect("mock tracker poisoned");
        let issue = issues.get_mut(id).ok_or_else(|| TrackerError::Remote { status: 404, body: id.to_string() })?;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(description) = &update.description {
            issue.description = description.clone();
        }
        if let Some(status) = &update.status {
            issue.status = status.clone();
        }
        Ok(issue.clone())
    }

    async fn get_issue(&self, id: &str) -> Result<RemoteIssue, TrackerError> {
        self.issues
            .lock()
            .expect("mock tracker poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::Remote { status: 404, body: id.to_string() })
    }

    async fn find_issues(&self, filter: &IssueFilter) -> Result<Vec<RemoteIssue>, TrackerError> {
        let issues = self.issues.lock().expect("mock tracker poisoned");
        Ok(issues
            .values()
            .filter(|issue| match filter.status.as_deref() {
                Some(s) => issue.status == s,
                None => true,
            })
            .filter(|issue| match filter.text.as_deref() {
                Some(t) => issue.title.contains(t),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create_subtask(&self, _parent_id: &str, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError> {
        self.create_issue(draft).await
    }

    async fn link_issues(&self, _from: &str, _to: &str, _relation: &str) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn transition_issue(&self, id: &str, status_name: &str) -> Result<(), TrackerError> {
        self.update_issue(id, &IssueUpdate { status: Some(status_name.to_string()), ..Default::default() })
            .await
            .map(|_| ())
    }

    async fn get_transitions(&self, _id: &str) -> Result<Vec<Transition>, TrackerError> {
        Ok(vec![
            Transition { id: "1".into(), name: "in_progress".into() },
            Transition { id: "2".into(), name: "done".into() },
        ])
    }

    async fn add_comment(&self, id: &str, _body: &str) -> Result<(), TrackerError> {
        self.get_issue(id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_transition_roundtrips() {
        let tracker = MockTracker::new();
        let draft = IssueDraft { title: "Ship it".into(), description: "".into(), issue_type: "task".into() };
        let issue = tracker.create_issue(&draft).await.unwrap();
        tracker.transition_issue(&issue.id, "done").await.unwrap();
        let fetched = tracker.get_issue(&issue.id).await.unwrap();
        assert_eq!(fetched.status, "done");
    }

    #[tokio::test]
    async fn unknown_issue_is_an_error() {
        let tracker = MockTracker::new();
        assert!(tracker.get_issue("MOCK-999").await.is_err());
    }
}
