use std::sync::Arc;

use super::cursor::Cursor;
use super::reconcile::{Reconciler, Rejected};
use super::report::{RecordFailure, SyncReport};
use super::staging::{Destination, StagingRecord};
use crate::error::SyncError;
use crate::providers::Board;

struct Group {
    destination: Destination,
    board: Arc<dyn Board>,
    records: Vec<StagingRecord>,
}

/// Collects staging records from every source first, then flushes them one
/// destination at a time.
#[derive(Default)]
pub struct BatchCoordinator {
    groups: Vec<Group>,
}

impl BatchCoordinator {
    /// Queue `records` for `board`. Records for a destination that is already
    /// queued join that group and keep the board it was first seen with.
    pub fn collect(&mut self, board: Arc<dyn Board>, records: Vec<StagingRecord>) -> &mut Self {
        for record in records {
            match self
                .groups
                .iter_mut()
                .find(|g| g.destination == record.destination)
            {
                Some(group) => group.records.push(record),
                None => self.groups.push(Group {
                    destination: record.destination.clone(),
                    board: Arc::clone(&board),
                    records: vec![record],
                }),
            }
        }
        self
    }

    pub fn pending(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    /// Apply every queued record, in collection order within each destination.
    ///
    /// Record-scoped failures land in `report` along with the timestamp of the
    /// first comment they did not deliver; the first fatal error stops the
    /// flush and is returned.
    pub async fn flush(
        self,
        reconciler: &mut Reconciler,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for group in self.groups {
            tracing::info!(list = %group.destination, records = group.records.len(), board = group.board.name(), "flushing destination");
            for record in group.records {
                match reconciler.apply(group.board.as_ref(), &record).await {
                    Ok(applied) => report.record_applied(&group.destination, &applied),
                    Err(Rejected { error, .. }) if error.is_fatal() => return Err(error),
                    Err(Rejected {
                        error,
                        comments_added,
                    }) => {
                        tracing::warn!(issue = %record.remote_id, list = %group.destination, error = %error, "record failed");
                        let resume_from = record
                            .comments
                            .get(comments_added)
                            .filter(|_| comments_added > 0)
                            .map(|c| Cursor::at(c.created_on));
                        report.failures.push(RecordFailure {
                            remote_id: record.remote_id,
                            destination: group.destination.clone(),
                            error,
                            resume_from,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
