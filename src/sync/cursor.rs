//! Cursor store: the "last successful sync" timestamp.
//!
//! The file cursor lives at `~/.rmt/last_update.json` unless configured
//! otherwise. Writes go to `<path>.tmp` and are renamed into place so a crash
//! never leaves a half-written timestamp behind.
//!
//! Next to the global cursor the file keeps one cursor per record that failed
//! to apply, so a retry only picks up what that record has not delivered yet.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::staging::Destination;
use crate::error::{io_err, SyncError};

/// Boundary between already-synchronised history and pending changes.
///
/// Held at whole-second precision: tracker timestamps carry no fractions, and
/// an edit at `10:00:00.900` reported as `10:00:00` must still be admitted by
/// a cursor taken at `10:00:00.700`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "DateTime<Utc>", into = "DateTime<Utc>")]
pub struct Cursor(DateTime<Utc>);

impl Cursor {
    pub fn now() -> Self {
        Cursor::at(Utc::now())
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        Cursor(instant.trunc_subsecs(0))
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    /// True when something stamped at `instant` is new relative to this cursor.
    pub fn admits(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.0
    }
}

impl From<DateTime<Utc>> for Cursor {
    fn from(instant: DateTime<Utc>) -> Self {
        Cursor::at(instant)
    }
}

impl From<Cursor> for DateTime<Utc> {
    fn from(cursor: Cursor) -> Self {
        cursor.instant()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

/// Cursors of records that still owe the board something: destination list
/// id, then remote issue id.
pub type Retries = BTreeMap<String, BTreeMap<String, Cursor>>;

/// Everything the store persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync: Cursor,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retry: Retries,
}

impl SyncState {
    pub fn new(last_sync: Cursor) -> Self {
        Self {
            last_sync,
            retry: Retries::new(),
        }
    }

    /// The cursor that governs `remote_id` on `destination`.
    pub fn cursor_for(&self, destination: &Destination, remote_id: &str) -> Cursor {
        self.retry
            .get(destination.as_str())
            .and_then(|ids| ids.get(remote_id))
            .copied()
            .unwrap_or(self.last_sync)
    }

    pub fn retry_count(&self) -> usize {
        self.retry.values().map(BTreeMap::len).sum()
    }
}

/// Durable home of the cursor. Only the run driver writes through it.
pub trait CursorStore {
    /// The persisted state, or `None` when no run has ever completed.
    fn load(&self) -> Result<Option<SyncState>, SyncError>;

    fn save(&self, state: &SyncState) -> Result<(), SyncError>;

    fn read(&self) -> Result<Option<Cursor>, SyncError> {
        Ok(self.load()?.map(|state| state.last_sync))
    }

    /// First run: persist "now" as the baseline. The caller transfers nothing.
    fn bootstrap(&self) -> Result<Cursor, SyncError> {
        let baseline = Cursor::now();
        self.save(&SyncState::new(baseline))?;
        Ok(baseline)
    }

    /// Move the global cursor forward to `to` and replace the per-record
    /// cursors with `retry`. The global cursor never moves backwards.
    fn advance(&self, to: Cursor, retry: Retries) -> Result<SyncState, SyncError> {
        let last_sync = match self.read()? {
            Some(current) if current > to => current,
            _ => to,
        };
        let state = SyncState { last_sync, retry };
        self.save(&state)?;
        Ok(state)
    }
}

/// Cursor kept in a small JSON file.
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<SyncState>, SyncError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        parse_state(&contents)
            .map(Some)
            .map_err(|reason| SyncError::CursorCorrupt {
                path: self.path.clone(),
                reason,
            })
    }

    fn save(&self, state: &SyncState) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| SyncError::CursorCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(
            path = %self.path.display(),
            cursor = %state.last_sync,
            retrying = state.retry_count(),
            "cursor written"
        );
        Ok(())
    }
}

/// Accepts the JSON document this store writes, plus a bare timestamp line
/// (RFC 3339 or `2024-01-01 10:00:00 +0100`) left behind by older tooling.
fn parse_state(contents: &str) -> Result<SyncState, String> {
    if let Ok(state) = serde_json::from_str::<SyncState>(contents) {
        return Ok(state);
    }
    let text = contents.trim();
    if text.is_empty() {
        return Err("file is empty".into());
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z"))
        .map(|dt| SyncState::new(Cursor::at(dt.with_timezone(&Utc))))
        .map_err(|e| format!("{text:?} is not a timestamp ({e})"))
}

/// In-memory store for engine tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryCursorStore {
    value: std::sync::Mutex<Option<SyncState>>,
    pub writes: std::sync::Mutex<Vec<SyncState>>,
}

#[cfg(test)]
impl MemoryCursorStore {
    pub fn with(cursor: Cursor) -> Self {
        let store = Self::default();
        *store.value.lock().unwrap() = Some(SyncState::new(cursor));
        store
    }

    pub fn current(&self) -> Option<Cursor> {
        self.state().map(|state| state.last_sync)
    }

    pub fn state(&self) -> Option<SyncState> {
        self.value.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<SyncState>, SyncError> {
        Ok(self.state())
    }

    fn save(&self, state: &SyncState) -> Result<(), SyncError> {
        *self.value.lock().unwrap() = Some(state.clone());
        self.writes.lock().unwrap().push(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn missing_file_reads_as_absent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("last_update.json"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn bootstrap_persists_now() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("nested").join("last_update.json"));

        let before = Utc::now().trunc_subsecs(0);
        let baseline = store.bootstrap().unwrap();
        let after = Utc::now();

        assert!(baseline.instant() >= before && baseline.instant() <= after);
        assert_eq!(store.read().unwrap(), Some(baseline));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("last_update.json"));
        let later = Cursor::at(ts("2024-03-01T00:00:00Z"));
        store.save(&SyncState::new(later)).unwrap();

        let kept = store
            .advance(Cursor::at(ts("2024-02-01T00:00:00Z")), Retries::new())
            .unwrap();
        assert_eq!(kept.last_sync, later);

        let moved = store
            .advance(Cursor::at(ts("2024-04-01T00:00:00Z")), Retries::new())
            .unwrap();
        assert_eq!(store.read().unwrap(), Some(moved.last_sync));
        assert_eq!(moved.last_sync.instant(), ts("2024-04-01T00:00:00Z"));
    }

    #[test]
    fn tmp_file_cleaned_up_after_write() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("last_update.json"));
        store.save(&SyncState::new(Cursor::now())).unwrap();
        assert!(!tmp.path().join("last_update.json.tmp").exists());
    }

    #[test]
    fn unparseable_file_is_an_error_not_absent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_update.json");
        std::fs::write(&path, "yesterday-ish").unwrap();

        let err = FileCursorStore::new(&path).read().unwrap_err();
        assert!(matches!(err, SyncError::CursorCorrupt { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_update.json");
        std::fs::write(&path, "").unwrap();

        let err = FileCursorStore::new(&path).read().unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn reads_legacy_plain_timestamp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_update.txt");
        std::fs::write(&path, "2024-01-01 10:00:00 +0100").unwrap();

        let cursor = FileCursorStore::new(&path).read().unwrap().unwrap();
        assert_eq!(cursor.instant(), ts("2024-01-01T09:00:00Z"));
    }

    #[test]
    fn unreadable_path_is_an_io_error_not_absent() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let err = FileCursorStore::new(blocker.join("last_update.json"))
            .load()
            .unwrap_err();
        assert!(matches!(err, SyncError::CursorIo { .. }));
    }

    #[test]
    fn retry_cursors_survive_a_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FileCursorStore::new(tmp.path().join("last_update.json"));
        let mut retry = Retries::new();
        retry
            .entry("list-1".into())
            .or_default()
            .insert("7".into(), Cursor::at(ts("2024-01-04T00:00:00Z")));

        store
            .advance(Cursor::at(ts("2024-02-01T00:00:00Z")), retry)
            .unwrap();

        let state = store.load().unwrap().unwrap();
        let list = Destination::new("list-1");
        assert_eq!(state.cursor_for(&list, "7").instant(), ts("2024-01-04T00:00:00Z"));
        assert_eq!(state.cursor_for(&list, "8").instant(), ts("2024-02-01T00:00:00Z"));
        assert_eq!(state.retry_count(), 1);
    }

    #[test]
    fn reads_files_without_retry_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_update.json");
        std::fs::write(&path, r#"{ "last_sync": "2024-01-01T00:00:00Z" }"#).unwrap();

        let state = FileCursorStore::new(&path).load().unwrap().unwrap();
        assert_eq!(state, SyncState::new(Cursor::at(ts("2024-01-01T00:00:00Z"))));
    }

    #[test]
    fn cursor_drops_fractional_seconds() {
        let cursor = Cursor::at(ts("2024-01-01T10:00:00.700Z"));
        assert_eq!(cursor.instant(), ts("2024-01-01T10:00:00Z"));
        assert!(cursor.admits(ts("2024-01-01T10:00:00Z")));
        assert!(!cursor.admits(ts("2024-01-01T09:59:59Z")));
        assert_eq!(Cursor::now().instant().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn admits_is_inclusive() {
        let cursor = Cursor::at(ts("2024-01-01T00:00:00Z"));
        assert!(cursor.admits(ts("2024-01-01T00:00:00Z")));
        assert!(cursor.admits(ts("2024-01-02T00:00:00Z")));
        assert!(!cursor.admits(ts("2023-12-31T23:59:59Z")));
    }
}
