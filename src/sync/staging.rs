use std::collections::HashMap;
use std::fmt;

use super::fetch::FetchedIssue;
use crate::model::issue::RemoteComment;

/// Where a staging record lands: a board list id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(String);

impl Destination {
    pub fn new(list_id: impl Into<String>) -> Self {
        Destination(list_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote issue, normalised and ready to be applied to the board.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRecord {
    pub remote_id: String,
    pub title: String,
    /// Deep link plus the original description.
    pub description: String,
    /// `None` when the tracker has no entry in the color map.
    pub color: Option<String>,
    pub comments: Vec<RemoteComment>,
    pub destination: Destination,
}

impl StagingRecord {
    pub fn build(
        fetched: FetchedIssue,
        issue_url: &str,
        color_map: &HashMap<String, String>,
        destination: &Destination,
    ) -> Self {
        let FetchedIssue { issue, comments } = fetched;
        let color = issue
            .tracker
            .as_ref()
            .and_then(|tracker| color_map.get(tracker))
            .cloned();

        StagingRecord {
            description: enrich_description(issue_url, issue.description.as_deref()),
            remote_id: issue.id,
            title: issue.subject,
            color,
            comments,
            destination: destination.clone(),
        }
    }

    /// Display name of the card created for this record.
    pub fn card_name(&self) -> String {
        format!("#{} {}", self.remote_id, self.title)
    }
}

pub fn enrich_description(issue_url: &str, description: Option<&str>) -> String {
    format!("{issue_url} \n\n{}", description.unwrap_or_default())
}

pub fn render_comment(comment: &RemoteComment) -> String {
    format!("{} wrote: \n\n{}", comment.author, comment.body)
}
