use super::cursor::Cursor;
use super::reconcile::Applied;
use super::staging::Destination;
use crate::error::SyncError;

/// Counts for one destination list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSummary {
    pub destination: Destination,
    pub created: usize,
    pub matched: usize,
    pub comments_added: usize,
    /// Cards created without the color label the board refused.
    pub unlabelled: usize,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub remote_id: String,
    pub destination: Destination,
    pub error: SyncError,
    /// Creation time of the first comment not delivered, when some were.
    pub resume_from: Option<Cursor>,
}

/// Outcome of one run.
#[derive(Debug)]
pub struct SyncReport {
    /// The cursor the run started from (the new baseline on a bootstrap run).
    pub since: Cursor,
    pub bootstrapped: bool,
    pub destinations: Vec<DestinationSummary>,
    pub failures: Vec<RecordFailure>,
    /// `SyncError::MalformedData` for every source record that was skipped.
    pub malformed: Vec<SyncError>,
    /// Set when the cursor was moved at the end of the run.
    pub cursor_advanced: Option<Cursor>,
    /// Failed records that keep their own cursor for the next run.
    pub retrying: usize,
}

impl SyncReport {
    pub fn new(since: Cursor) -> Self {
        Self {
            since,
            bootstrapped: false,
            destinations: Vec::new(),
            failures: Vec::new(),
            malformed: Vec::new(),
            cursor_advanced: None,
            retrying: 0,
        }
    }

    pub fn bootstrapped(baseline: Cursor) -> Self {
        Self {
            bootstrapped: true,
            cursor_advanced: Some(baseline),
            ..Self::new(baseline)
        }
    }

    pub(crate) fn record_applied(&mut self, destination: &Destination, applied: &Applied) {
        let summary = match self
            .destinations
            .iter()
            .position(|s| &s.destination == destination)
        {
            Some(i) => &mut self.destinations[i],
            None => {
                self.destinations.push(DestinationSummary {
                    destination: destination.clone(),
                    created: 0,
                    matched: 0,
                    comments_added: 0,
                    unlabelled: 0,
                });
                let last = self.destinations.len() - 1;
                &mut self.destinations[last]
            }
        };
        if applied.created {
            summary.created += 1;
        } else {
            summary.matched += 1;
        }
        summary.comments_added += applied.comments_added;
        if applied.unlabelled {
            summary.unlabelled += 1;
        }
    }

    pub fn created(&self) -> usize {
        self.destinations.iter().map(|s| s.created).sum()
    }

    pub fn matched(&self) -> usize {
        self.destinations.iter().map(|s| s.matched).sum()
    }

    pub fn comments_added(&self) -> usize {
        self.destinations.iter().map(|s| s.comments_added).sum()
    }

    pub fn unlabelled(&self) -> usize {
        self.destinations.iter().map(|s| s.unlabelled).sum()
    }

    /// True when every staging record was applied.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
