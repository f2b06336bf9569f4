use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an issue as the tracker reports it. Never mutated locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Numeric id of the owning project, used to drop sub-project issues.
    pub project_id: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_ratio: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteComment {
    pub author: String,
    pub created_on: DateTime<Utc>,
    pub body: String,
}

/// A listing entry the source could not turn into a [`RemoteIssue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    /// Whatever identifies the record, if the id itself was readable.
    pub hint: Option<String>,
    pub reason: String,
}

/// One element of an issue listing, decoded independently of its siblings.
pub type Decoded<T> = Result<T, MalformedRecord>;
