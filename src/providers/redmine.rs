use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::IssueSource;
use crate::model::issue::{Decoded, MalformedRecord, RemoteComment, RemoteIssue};

/// Redmine caps `limit` at 100 regardless of what is asked for.
const PAGE_SIZE: usize = 100;

pub struct RedmineSource {
    base_url: String,
    auth_header: Option<String>,
    api_key: Option<String>,
    include_closed: bool,
    client: reqwest::Client,
}

impl RedmineSource {
    pub fn new(
        base_url: String,
        username: Option<String>,
        password: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        let auth_header = match (username, password) {
            (Some(user), Some(pass)) => {
                let creds = format!("{user}:{pass}");
                let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
                Some(format!("Basic {encoded}"))
            }
            _ => None,
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            api_key,
            include_closed: false,
            client: reqwest::Client::new(),
        }
    }

    /// Also list closed issues (Redmine only lists open ones by default).
    pub fn with_closed_issues(mut self, include_closed: bool) -> Self {
        self.include_closed = include_closed;
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url).header("Accept", "application/json");
        if let Some(auth) = &self.auth_header {
            req = req.header("Authorization", auth);
        }
        if let Some(key) = &self.api_key {
            req = req.header("X-Redmine-API-Key", key);
        }
        req
    }
}

#[derive(Deserialize)]
struct IssuePage {
    issues: Vec<serde_json::Value>,
    total_count: Option<usize>,
}

#[derive(Deserialize)]
struct NamedRef {
    id: u64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct RedmineIssue {
    id: u64,
    subject: String,
    description: Option<String>,
    project: NamedRef,
    tracker: Option<NamedRef>,
    status: Option<NamedRef>,
    priority: Option<NamedRef>,
    author: Option<NamedRef>,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
    estimated_hours: Option<f64>,
    done_ratio: Option<u8>,
}

impl From<RedmineIssue> for RemoteIssue {
    fn from(issue: RedmineIssue) -> Self {
        RemoteIssue {
            id: issue.id.to_string(),
            subject: issue.subject,
            description: issue.description,
            tracker: issue.tracker.and_then(|t| t.name),
            status: issue.status.and_then(|s| s.name),
            priority: issue.priority.and_then(|p| p.name),
            author: issue.author.and_then(|a| a.name),
            project_id: issue.project.id.to_string(),
            created_on: issue.created_on,
            updated_on: issue.updated_on,
            estimated_hours: issue.estimated_hours,
            done_ratio: issue.done_ratio,
        }
    }
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issue: IssueWithJournals,
}

#[derive(Deserialize)]
struct IssueWithJournals {
    #[serde(default)]
    journals: Vec<Journal>,
}

#[derive(Deserialize)]
struct Journal {
    user: Option<NamedRef>,
    notes: Option<String>,
    created_on: DateTime<Utc>,
}

impl From<Journal> for RemoteComment {
    fn from(journal: Journal) -> Self {
        RemoteComment {
            author: journal
                .user
                .and_then(|u| u.name)
                .unwrap_or_else(|| "Anonymous".into()),
            created_on: journal.created_on,
            body: journal.notes.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct ProjectEnvelope {
    project: NamedRef,
}

/// Decode one element of `/issues.json` on its own so a single bad record
/// does not take the whole listing down with it.
fn decode_issue(value: serde_json::Value) -> Decoded<RemoteIssue> {
    let hint = value.get("id").map(|id| id.to_string());
    serde_json::from_value::<RedmineIssue>(value)
        .map(RemoteIssue::from)
        .map_err(|e| MalformedRecord {
            hint,
            reason: e.to_string(),
        })
}

/// Where the next page starts, or `None` once the listing is exhausted.
/// A page without `total_count` is taken to be the only one.
fn next_offset(offset: usize, fetched: usize, total_count: Option<usize>) -> Option<usize> {
    let next = offset + fetched;
    match total_count {
        Some(total) if fetched > 0 && next < total => Some(next),
        _ => None,
    }
}

#[async_trait]
impl IssueSource for RedmineSource {
    fn name(&self) -> &str {
        "Redmine"
    }

    async fn resolve_project(&self, scope: &str) -> Result<String> {
        if scope.parse::<u64>().is_ok() {
            return Ok(scope.to_string());
        }
        let url = format!("{}/projects/{}.json", self.base_url, urlencoding::encode(scope));
        let envelope: ProjectEnvelope = self
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Redmine project lookup for {scope} failed"))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse Redmine project response")?;
        Ok(envelope.project.id.to_string())
    }

    async fn list_issues(&self, scope: &str) -> Result<Vec<Decoded<RemoteIssue>>> {
        let url = format!("{}/issues.json", self.base_url);
        let mut issues = Vec::new();
        let mut offset = 0;

        loop {
            let mut req = self
                .get(&url)
                .query(&[("project_id", scope)])
                .query(&[("limit", PAGE_SIZE), ("offset", offset)]);
            if self.include_closed {
                req = req.query(&[("status_id", "*")]);
            }

            let page: IssuePage = req
                .send()
                .await
                .context("Redmine issue listing failed")?
                .error_for_status()?
                .json()
                .await
                .context("Failed to parse Redmine issue listing")?;

            let fetched = page.issues.len();
            issues.extend(page.issues.into_iter().map(decode_issue));
            match next_offset(offset, fetched, page.total_count) {
                Some(next) => offset = next,
                None => break,
            }
        }

        tracing::debug!(project = scope, count = issues.len(), "listed Redmine issues");
        Ok(issues)
    }

    async fn get_comments(&self, issue_id: &str) -> Result<Vec<RemoteComment>> {
        let url = format!(
            "{}/issues/{}.json",
            self.base_url,
            urlencoding::encode(issue_id)
        );
        let envelope: IssueEnvelope = self
            .get(&url)
            .query(&[("include", "journals")])
            .send()
            .await
            .with_context(|| format!("Redmine journals for issue {issue_id} failed"))?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse Redmine issue journals")?;

        Ok(envelope
            .issue
            .journals
            .into_iter()
            .map(RemoteComment::from)
            .collect())
    }

    fn issue_url(&self, issue_id: &str) -> String {
        format!("{}/issues/{issue_id}", self.base_url)
    }
}
