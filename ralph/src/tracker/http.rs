//! A generic REST adapter, spec §4.H/§6.5: each tracker type's exact
//! headers and payload shape would normally live in its own module;
//! this one speaks a plain JSON CRUD convention (`GET/POST/PUT
//! {baseUrl}/issues[...]`) so the crate ships with a usable networked
//! adapter without hand-writing a specific vendor's API, grounded on
//! the teacher's `AnthropicClient` (reqwest::Client + bearer header +
//! JSON body, errors mapped to a crate-local error type).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Auth, IssueDraft, IssueFilter, IssueUpdate, RemoteIssue, Transition, Tracker, TrackerError};
use crate::config::TrackerConfig;

pub struct HttpTracker {
    http: Client,
    base_url: String,
    auth: Option<Auth>,
    dry_run: bool,
}

impl HttpTracker {
    pub fn from_config(config: &TrackerConfig, auth: Option<Auth>) -> Result<Self, TrackerError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| TrackerError::Http("http tracker requires base_url".to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TrackerError::Http(e.to_string()))?;
        Ok(Self { http, base_url, auth, dry_run: config.dry_run })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(Auth::Bearer(token)) => builder.bearer_auth(token),
            Some(Auth::OAuth(token)) => builder.bearer_auth(token),
            Some(Auth::Basic { username, password }) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, builder: reqwest::RequestBuilder) -> Result<T, TrackerError> {
        let response = self.authorize(builder).send().await.map_err(|e| TrackerError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Remote { status: status.as_u16(), body });
        }
        response.json::<T>().await.map_err(|e| TrackerError::Http(e.to_string()))
    }

    fn synthesize(&self, id_hint: &str) -> RemoteIssue {
        RemoteIssue {
            id: id_hint.to_string(),
            title: String::new(),
            description: String::new(),
            status: "open".to_string(),
            url: None,
        }
    }
}

#[derive(Serialize)]
struct CreatePayload<'a> {
    title: &'a str,
    description: &'a str,
    issue_type: &'a str,
    parent: Option<&'a str>,
}

#[derive(Serialize)]
struct LinkPayload<'a> {
    from: &'a str,
    to: &'a str,
    relation: &'a str,
}

#[derive(Serialize)]
struct TransitionPayload<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct CommentPayload<'a> {
    body: &'a str,
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn connect(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TrackerError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, TrackerError> {
        let builder = self.http.get(format!("{}/health", self.base_url));
        let response = self.authorize(builder).send().await.map_err(|e| TrackerError::Http(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError> {
        if self.dry_run {
            return Ok(self.synthesize("DRY-RUN"));
        }
        let payload = CreatePayload { title: &draft.title, description: &draft.description, issue_type: &draft.issue_type, parent: None };
        let builder = self.http.post(format!("{}/issues", self.base_url)).json(&payload);
        self.send(builder).await
    }

    async fn update_issue(&self, id: &str, update: &IssueUpdate) -> Result<RemoteIssue, TrackerError> {
        if self.dry_run {
            return Ok(self.synthesize(id));
        }
        let builder = self.http.put(format!("{}/issues/{id}", self.base_url)).json(update);
        self.send(builder).await
    }

    async fn get_issue(&self, id: &str) -> Result<RemoteIssue, TrackerError> {
        let builder = self.http.get(format!("{}/issues/{id}", self.base_url));
        self.send(builder).await
    }

    async fn find_issues(&self, filter: &IssueFilter) -> Result<Vec<RemoteIssue>, TrackerError> {
        let mut builder = self.http.get(format!("{}/issues", self.base_url));
        if let Some(status) = &filter.status {
            builder = builder.query(&[("status", status)]);
        }
        if let Some(text) = &filter.text {
            builder = builder.query(&[("q", text)]);
        }
        self.send(builder).await
    }

    async fn create_subtask(&self, parent_id: &str, draft: &IssueDraft) -> Result<RemoteIssue, TrackerError> {
        if self.dry_run {
            return Ok(self.synthesize("DRY-RUN"));
        }
        let payload = CreatePayload {
            title: &draft.title,
            description: &draft.description,
            issue_type: &draft.issue_type,
            parent: Some(parent_id),
        };
        let builder = self.http.post(format!("{}/issues", self.base_url)).json(&payload);
        self.send(builder).await
    }

    async fn link_issues(&self, from: &str, to: &str, relation: &str) -> Result<(), TrackerError> {
        if self.dry_run {
            return Ok(());
        }
        let payload = LinkPayload { from, to, relation };
        let builder = self.http.post(format!("{}/links", self.base_url)).json(&payload);
        self.authorize(builder).send().await.map_err(|e| TrackerError::Http(e.to_string()))?;
        Ok(())
    }

    async fn transition_issue(&self, id: &str, status_name: &str) -> Result<(), TrackerError> {
        if self.dry_run {
            return Ok(());
        }
        let payload = TransitionPayload { status: status_name };
        let builder = self.http.post(format!("{}/issues/{id}/transitions", self.base_url)).json(&payload);
        self.authorize(builder).send().await.map_err(|e| TrackerError::Http(e.to_string()))?;
        Ok(())
    }

    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>, TrackerError> {
        let builder = self.http.get(format!("{}/issues/{id}/transitions", self.base_url));
        self.send(builder).await
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<(), TrackerError> {
        if self.dry_run {
            return Ok(());
        }
        let payload = CommentPayload { body };
        let builder = self.http.post(format!("{}/issues/{id}/comments", self.base_url)).json(&payload);
        self.authorize(builder).send().await.map_err(|e| TrackerError::Http(e.to_string()))?;
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
