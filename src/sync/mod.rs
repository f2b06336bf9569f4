//! One-way incremental sync of tracker issues onto a board.
//!
//! A run reads the cursor, fetches what changed since then from every
//! source, stages it per destination list, applies it, and only then moves
//! the cursor forward. A record that fails keeps its own cursor, so the next
//! run retries it without re-sending what already reached the board.

pub mod batch;
pub mod cursor;
pub mod fetch;
pub mod reconcile;
pub mod report;
pub mod staging;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SyncError;
use crate::providers::{Board, IssueSource};

use batch::BatchCoordinator;
use cursor::{Cursor, CursorStore, Retries, SyncState};
use reconcile::{MatchStrategy, Reconciler};
use report::SyncReport;
use staging::{Destination, StagingRecord};

/// One configured source-to-list pairing.
pub struct SyncJob {
    pub source: Arc<dyn IssueSource>,
    /// Project scope handed to the source.
    pub scope: String,
    pub board: Arc<dyn Board>,
    pub destination: Destination,
    /// Tracker name to card color.
    pub color_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub strategy: MatchStrategy,
    /// Keep a cursor per failed record so it is retried next run. When off,
    /// a failed record is only picked up again once its issue changes.
    pub retry_failed: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::default(),
            retry_failed: true,
        }
    }
}

/// Run one synchronisation over `jobs`.
///
/// Without a stored cursor the run only records a baseline and transfers
/// nothing. Any fatal error returns before the cursor is touched.
pub async fn run(
    jobs: &[SyncJob],
    store: &dyn CursorStore,
    options: SyncOptions,
) -> Result<SyncReport, SyncError> {
    let Some(state) = store.load()? else {
        let baseline = store.bootstrap()?;
        tracing::info!(cursor = %baseline, "no previous sync; baseline recorded, nothing transferred");
        return Ok(SyncReport::bootstrapped(baseline));
    };

    // Advance to the moment fetching started so edits made mid-run are seen next time.
    let started = Cursor::now();
    let mut report = SyncReport::new(state.last_sync);
    let mut batch = BatchCoordinator::default();

    for job in jobs {
        let cursor_for = |id: &str| state.cursor_for(&job.destination, id);
        let change_set = fetch::fetch_since(job.source.as_ref(), &job.scope, cursor_for).await?;
        report.malformed.extend(change_set.malformed);

        let records: Vec<StagingRecord> = change_set
            .issues
            .into_iter()
            .map(|fetched| {
                let url = job.source.issue_url(&fetched.issue.id);
                StagingRecord::build(fetched, &url, &job.color_map, &job.destination)
            })
            .collect();
        batch.collect(Arc::clone(&job.board), records);
    }

    tracing::info!(
        records = batch.pending(),
        since = %state.last_sync,
        retrying = state.retry_count(),
        "staged change set"
    );
    let mut reconciler = Reconciler::new(options.strategy);
    batch.flush(&mut reconciler, &mut report).await?;

    let retry = if options.retry_failed {
        retries(&report, &state)
    } else {
        Retries::new()
    };
    let advanced = store.advance(started, retry)?;
    report.cursor_advanced = Some(advanced.last_sync);
    report.retrying = advanced.retry_count();

    if report.is_success() {
        tracing::info!(cursor = %advanced.last_sync, "cursor advanced");
    } else {
        tracing::warn!(
            cursor = %advanced.last_sync,
            failures = report.failures.len(),
            retrying = report.retrying,
            "cursor advanced past failed records"
        );
    }

    Ok(report)
}

/// Per-record cursors for this run's failures: where delivery stopped, or the
/// cursor the record was fetched with when nothing reached the board.
fn retries(report: &SyncReport, state: &SyncState) -> Retries {
    let mut retry = Retries::new();
    for failure in &report.failures {
        let cursor = failure
            .resume_from
            .unwrap_or_else(|| state.cursor_for(&failure.destination, &failure.remote_id));
        retry
            .entry(failure.destination.as_str().to_string())
            .or_default()
            .insert(failure.remote_id.clone(), cursor);
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::{card, comment, issue, ts, BoardCall, MockBoard, MockSource};
    use chrono::SubsecRound;
    use cursor::MemoryCursorStore;

    fn job(source: Arc<MockSource>, board: Arc<MockBoard>, list: &str) -> SyncJob {
        SyncJob {
            source,
            scope: "5".into(),
            board,
            destination: Destination::new(list),
            color_map: HashMap::from([("Bug".to_string(), "red".to_string())]),
        }
    }

    fn jan_first() -> MemoryCursorStore {
        MemoryCursorStore::with(Cursor::at(ts("2024-01-01T00:00:00Z")))
    }

    #[tokio::test]
    async fn end_to_end_creates_card_then_comments() {
        let mut bug = issue("7", "2024-01-02T00:00:00Z", "Bug");
        bug.subject = "Crash on save".into();
        let source = Arc::new(MockSource::new("5").with_issue(
            bug,
            vec![comment("A", "2024-01-03T00:00:00Z", "note")],
        ));
        let board = Arc::new(MockBoard::new());
        let store = jan_first();

        let report = run(&[job(source, board.clone(), "list-1")], &store, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(
            board.calls(),
            vec![
                BoardCall::List("list-1".into()),
                BoardCall::Create {
                    list: "list-1".into(),
                    name: "#7 Crash on save".into(),
                    description: "https://x/issues/7 \n\n".into(),
                    color: Some("red".into()),
                },
                BoardCall::Comment {
                    card_id: "card-1".into(),
                    text: "A wrote: \n\nnote".into(),
                },
            ]
        );
        assert_eq!(report.created(), 1);
        assert_eq!(report.comments_added(), 1);
        assert!(report.cursor_advanced.is_some());
        assert!(store.current().unwrap() > Cursor::at(ts("2024-01-01T00:00:00Z")));
    }

    #[tokio::test]
    async fn bootstrap_fetches_nothing_and_sets_cursor() {
        let source = Arc::new(
            MockSource::new("5").with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let board = Arc::new(MockBoard::new());
        let store = MemoryCursorStore::default();

        let before = chrono::Utc::now().trunc_subsecs(0);
        let report = run(
            &[job(source.clone(), board.clone(), "list-1")],
            &store,
            SyncOptions::default(),
        )
        .await
        .unwrap();
        let after = chrono::Utc::now();

        assert!(report.bootstrapped);
        assert!(source.calls().is_empty());
        assert!(board.calls().is_empty());
        let cursor = store.current().unwrap().instant();
        assert!(cursor >= before && cursor <= after);
    }

    #[tokio::test]
    async fn rerun_against_existing_card_does_not_create_another() {
        let source = Arc::new(
            MockSource::new("5").with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let board = Arc::new(MockBoard::new().with_card("list-1", card("c1", "#7 renamed on the board")));

        run(&[job(source, board.clone(), "list-1")], &jan_first(), SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(board.creates(), 0);
    }

    #[tokio::test]
    async fn sub_project_issue_never_reaches_the_board() {
        let mut foreign = issue("8", "2024-01-02T00:00:00Z", "Bug");
        foreign.project_id = "6".into();
        let source = Arc::new(MockSource::new("5").with_issue(foreign, vec![]));
        let board = Arc::new(MockBoard::new());

        let report = run(&[job(source, board.clone(), "list-1")], &jan_first(), SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(board.creates(), 0);
        assert_eq!(report.created(), 0);
    }

    #[tokio::test]
    async fn sources_sharing_a_list_are_flushed_together() {
        let first = Arc::new(
            MockSource::new("5").with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let second = Arc::new(MockSource::new("5").with_issue(
            issue("7", "2024-01-03T00:00:00Z", "Bug"),
            vec![comment("B", "2024-01-03T00:00:00Z", "from the mirror")],
        ));
        let board = Arc::new(MockBoard::new());

        let report = run(
            &[
                job(first, board.clone(), "list-1"),
                job(second, board.clone(), "list-1"),
            ],
            &jan_first(),
            SyncOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(board.listings(), 1);
        assert_eq!(board.creates(), 1);
        assert_eq!(report.matched(), 1);
        assert_eq!(board.comment_texts(), ["B wrote: \n\nfrom the mirror"]);
    }

    #[tokio::test]
    async fn failed_record_keeps_its_own_cursor() {
        let source = Arc::new(
            MockSource::new("5")
                .with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![])
                .with_issue(issue("8", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let board = Arc::new(MockBoard::new().failing_create("#7 "));
        let store = jan_first();

        let report = run(&[job(source, board.clone(), "list-1")], &store, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.created(), 1);
        assert_eq!(report.retrying, 1);

        let state = store.state().unwrap();
        assert!(state.last_sync > Cursor::at(ts("2024-01-01T00:00:00Z")));
        let list = Destination::new("list-1");
        assert_eq!(state.cursor_for(&list, "7"), Cursor::at(ts("2024-01-01T00:00:00Z")));
        assert_eq!(state.cursor_for(&list, "8"), state.last_sync);
    }

    #[tokio::test]
    async fn retries_never_repeat_delivered_comments() {
        let source = Arc::new(
            MockSource::new("5")
                .with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![])
                .with_issue(
                    issue("8", "2024-01-03T00:00:00Z", "Bug"),
                    vec![comment("A", "2024-01-03T00:00:00Z", "note")],
                ),
        );
        let board = Arc::new(MockBoard::new().failing_create("#7 "));
        let store = jan_first();
        let jobs = [job(source, board.clone(), "list-1")];

        for _ in 0..3 {
            let report = run(&jobs, &store, SyncOptions::default()).await.unwrap();
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].remote_id, "7");
        }

        assert_eq!(board.comment_texts(), ["A wrote: \n\nnote"]);
        let attempts = board
            .calls()
            .iter()
            .filter(|c| matches!(c, BoardCall::Create { name, .. } if name.starts_with("#7 ")))
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn retry_resumes_a_thread_where_delivery_stopped() {
        let thread = vec![
            comment("A", "2024-01-03T00:00:00Z", "first"),
            comment("A", "2024-01-04T00:00:00Z", "second"),
            comment("A", "2024-01-05T00:00:00Z", "third"),
        ];
        let source = Arc::new(
            MockSource::new("5").with_issue(issue("7", "2024-01-05T00:00:00Z", "Bug"), thread),
        );
        let store = jan_first();

        let flaky = Arc::new(
            MockBoard::new()
                .with_card("list-1", card("c1", "#7 Fix bug"))
                .failing_comment("second"),
        );
        let report = run(&[job(source.clone(), flaky.clone(), "list-1")], &store, SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(flaky.comment_texts(), ["A wrote: \n\nfirst"]);

        let healthy = Arc::new(MockBoard::new().with_card("list-1", card("c1", "#7 Fix bug")));
        let report = run(&[job(source, healthy.clone(), "list-1")], &store, SyncOptions::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.retrying, 0);
        assert_eq!(
            healthy.comment_texts(),
            ["A wrote: \n\nsecond", "A wrote: \n\nthird"]
        );
        assert_eq!(store.state().unwrap().retry_count(), 0);
    }

    #[tokio::test]
    async fn retry_can_be_turned_off() {
        let source = Arc::new(
            MockSource::new("5").with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let board = Arc::new(MockBoard::new().failing_create("#7 "));
        let store = jan_first();
        let options = SyncOptions {
            retry_failed: false,
            ..SyncOptions::default()
        };

        let report = run(&[job(source, board, "list-1")], &store, options)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.cursor_advanced.is_some());
        assert_eq!(report.retrying, 0);
        assert_eq!(store.state().unwrap().retry_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_aborts_without_advancing() {
        let source = Arc::new(MockSource::new("5").failing());
        let board = Arc::new(MockBoard::new());
        let store = jan_first();

        let err = run(&[job(source, board.clone(), "list-1")], &store, SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Transport { .. }));
        assert!(board.calls().is_empty());
        assert!(store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_records_are_reported_and_do_not_block_the_cursor() {
        let source = Arc::new(
            MockSource::new("5")
                .with_malformed(None, "missing field `id`")
                .with_issue(issue("7", "2024-01-02T00:00:00Z", "Bug"), vec![]),
        );
        let board = Arc::new(MockBoard::new());

        let report = run(&[job(source, board, "list-1")], &jan_first(), SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.created(), 1);
        assert!(report.cursor_advanced.is_some());
    }
}
