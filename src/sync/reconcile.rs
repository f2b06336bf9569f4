//! Idempotent create-or-merge of staging records onto the board.
//!
//! Cards are joined to remote issues by the `#<id>` prefix in their name
//! (or by an explicit external id when the board has one). Each list's cards
//! are fetched once per run and kept in [`Reconciler`]; cards created during
//! the run are added to that listing so later records can find them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::Deserialize;

use super::staging::{render_comment, Destination, StagingRecord};
use crate::error::SyncError;
use crate::model::card::Card;
use crate::providers::{Board, Created};

/// How a card name is matched against `#<remote id>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// `#<id>` must not run into a further ASCII letter or digit: `#7`
    /// matches neither `#70` nor `#7b`.
    #[default]
    Token,
    /// Plain substring containment.
    Substring,
}

impl MatchStrategy {
    pub fn matches(self, card: &Card, remote_id: &str) -> bool {
        if let Some(external_id) = &card.external_id {
            return external_id == remote_id;
        }
        let needle = format!("#{remote_id}");
        match self {
            MatchStrategy::Substring => card.name.contains(&needle),
            MatchStrategy::Token => card.name.match_indices(&needle).any(|(at, _)| {
                !card.name[at + needle.len()..].starts_with(|c: char| c.is_ascii_alphanumeric())
            }),
        }
    }
}

/// What happened to one staging record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub card_id: String,
    pub created: bool,
    pub comments_added: usize,
    /// The card was created but the board refused its color.
    pub unlabelled: bool,
}

/// A record that was not fully applied.
#[derive(Debug)]
pub struct Rejected {
    pub error: SyncError,
    /// Comments that reached the card before the failure.
    pub comments_added: usize,
}

impl From<SyncError> for Rejected {
    fn from(error: SyncError) -> Self {
        Rejected {
            error,
            comments_added: 0,
        }
    }
}

pub struct Reconciler {
    strategy: MatchStrategy,
    listings: HashMap<Destination, Vec<Card>>,
}

impl Reconciler {
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            listings: HashMap::new(),
        }
    }

    async fn listing(
        &mut self,
        board: &dyn Board,
        destination: &Destination,
    ) -> Result<&mut Vec<Card>, SyncError> {
        match self.listings.entry(destination.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let cards = board.list_records(destination.as_str()).await.map_err(|e| {
                    SyncError::transport(format!("listing {} cards in {destination}", board.name()), e)
                })?;
                tracing::debug!(list = %destination, cards = cards.len(), "loaded existing cards");
                Ok(entry.insert(cards))
            }
        }
    }

    /// Find or create the card for `record`, then append its comments.
    ///
    /// A listing failure is fatal (`Transport`); a failed create or comment
    /// is scoped to this record (`Reconciliation`) and says how many comments
    /// made it. Comments are appended as given; de-duplication is the
    /// cursor's job.
    pub async fn apply(
        &mut self,
        board: &dyn Board,
        record: &StagingRecord,
    ) -> Result<Applied, Rejected> {
        let strategy = self.strategy;
        let cards = self.listing(board, &record.destination).await?;

        let existing = cards
            .iter()
            .find(|card| strategy.matches(card, &record.remote_id))
            .cloned();

        let (card, created, unlabelled) = match existing {
            Some(card) => (card, false, false),
            None => {
                let Created { card, label_error } = board
                    .create_record(
                        record.destination.as_str(),
                        &record.card_name(),
                        &record.description,
                        record.color.as_deref(),
                    )
                    .await
                    .map_err(|e| SyncError::reconciliation(&record.remote_id, "creating card", e))?;
                tracing::info!(issue = %record.remote_id, card = %card.name, list = %record.destination, "created card");
                cards.push(card.clone());
                if let Some(err) = &label_error {
                    tracing::warn!(issue = %record.remote_id, card = %card.name, error = %err, "card left without a color label");
                }
                (card, true, label_error.is_some())
            }
        };

        let mut comments_added = 0;
        for comment in &record.comments {
            board
                .add_comment(&card, &render_comment(comment))
                .await
                .map_err(|e| Rejected {
                    error: SyncError::reconciliation(
                        &record.remote_id,
                        format!("adding comment {} of {}", comments_added + 1, record.comments.len()),
                        e,
                    ),
                    comments_added,
                })?;
            comments_added += 1;
        }
        if comments_added > 0 {
            tracing::info!(issue = %record.remote_id, card = %card.name, comments = comments_added, "updated card");
        }

        Ok(Applied {
            card_id: card.id,
            created,
            comments_added,
            unlabelled,
        })
    }
}
