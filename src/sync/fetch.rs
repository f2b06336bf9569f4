use super::cursor::Cursor;
use crate::error::SyncError;
use crate::model::issue::{RemoteComment, RemoteIssue};
use crate::providers::IssueSource;

/// An issue selected for sync together with its comments newer than the cursor.
#[derive(Debug, Clone)]
pub struct FetchedIssue {
    pub issue: RemoteIssue,
    pub comments: Vec<RemoteComment>,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub issues: Vec<FetchedIssue>,
    /// Listing entries that could not be decoded; always `SyncError::MalformedData`.
    pub malformed: Vec<SyncError>,
}

/// Everything in `scope` that changed at or after its cursor.
///
/// `cursor_for` picks the cursor for each issue id: the global one, or an
/// older one for a record that failed last time. Issues owned by another
/// project (sub-projects show up in Redmine's listing) are dropped, and so
/// are comments that are empty or older than the cursor. An issue with no
/// surviving comments is still returned.
pub async fn fetch_since(
    source: &dyn IssueSource,
    scope: &str,
    cursor_for: impl Fn(&str) -> Cursor,
) -> Result<ChangeSet, SyncError> {
    let project_id = source
        .resolve_project(scope)
        .await
        .map_err(|e| SyncError::transport(format!("resolving {} project {scope}", source.name()), e))?;

    let listing = source
        .list_issues(scope)
        .await
        .map_err(|e| SyncError::transport(format!("listing {} issues for {scope}", source.name()), e))?;

    let mut change_set = ChangeSet::default();
    for entry in listing {
        let issue = match entry {
            Ok(issue) => issue,
            Err(bad) => {
                let record = bad.hint.unwrap_or_else(|| "<unknown id>".into());
                tracing::warn!(record = %record, reason = %bad.reason, "skipping malformed issue");
                change_set.malformed.push(SyncError::MalformedData {
                    record,
                    reason: bad.reason,
                });
                continue;
            }
        };

        let cursor = cursor_for(&issue.id);
        if !cursor.admits(issue.updated_on) {
            continue;
        }
        if issue.project_id != project_id {
            tracing::debug!(issue = %issue.id, project = %issue.project_id, "ignoring sub-project issue");
            continue;
        }

        let comments = source
            .get_comments(&issue.id)
            .await
            .map_err(|e| SyncError::transport(format!("fetching comments for issue {}", issue.id), e))?;

        change_set.issues.push(FetchedIssue {
            comments: new_comments(comments, cursor),
            issue,
        });
    }

    tracing::info!(
        source = source.name(),
        scope,
        changed = change_set.issues.len(),
        malformed = change_set.malformed.len(),
        "fetched change set"
    );
    Ok(change_set)
}

/// Comments with a body, created at or after the cursor, in source order.
pub fn new_comments(comments: Vec<RemoteComment>, cursor: Cursor) -> Vec<RemoteComment> {
    comments
        .into_iter()
        .filter(|c| !c.body.is_empty() && cursor.admits(c.created_on))
        .collect()
}
