pub mod redmine;
pub mod trello;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AppConfig;
use crate::model::card::Card;
use crate::model::issue::{Decoded, RemoteComment, RemoteIssue};
use crate::sync::staging::Destination;
use crate::sync::SyncJob;

/// The issue tracker we read from.
#[async_trait]
pub trait IssueSource: Send + Sync {
    fn name(&self) -> &str;

    /// Turn a configured project scope into the id issues report as their owner.
    async fn resolve_project(&self, scope: &str) -> Result<String> {
        Ok(scope.to_string())
    }

    /// Every issue the tracker lists for `scope`, sub-projects included.
    async fn list_issues(&self, scope: &str) -> Result<Vec<Decoded<RemoteIssue>>>;

    /// Full comment history of one issue, oldest first.
    async fn get_comments(&self, issue_id: &str) -> Result<Vec<RemoteComment>>;

    /// Stable deep link back to the issue.
    fn issue_url(&self, issue_id: &str) -> String;
}

/// A card that exists on the board once `create_record` returns.
#[derive(Debug)]
pub struct Created {
    pub card: Card,
    /// Set when the card was created but its color could not be applied.
    pub label_error: Option<anyhow::Error>,
}

/// The kanban board we write to.
#[async_trait]
pub trait Board: Send + Sync {
    fn name(&self) -> &str;
    async fn list_records(&self, list_id: &str) -> Result<Vec<Card>>;
    /// `Err` means no card was created.
    async fn create_record(
        &self,
        list_id: &str,
        name: &str,
        description: &str,
        color: Option<&str>,
    ) -> Result<Created>;
    async fn add_comment(&self, card: &Card, text: &str) -> Result<()>;
}


pub fn create_jobs(config: &AppConfig) -> Vec<SyncJob> {
    config
        .sync
        .iter()
        .map(|cfg| {
            let source = redmine::RedmineSource::new(
                cfg.redmine.base_url.clone(),
                cfg.redmine.username.clone(),
                cfg.redmine.password.clone(),
                cfg.redmine.api_key.clone(),
            )
            .with_closed_issues(cfg.redmine.include_closed);
            let board = trello::TrelloBoard::new(cfg.trello.api_key.clone(), cfg.trello.token.clone());

            SyncJob {
                source: Arc::new(source),
                scope: cfg.redmine.project_id.clone(),
                board: Arc::new(board),
                destination: Destination::new(cfg.trello.list_id.clone()),
                color_map: cfg.trello.color_map.clone(),
            }
        })
        .collect()
}
