// 🗄️ Snapshot Store - durable grade history
// Latest-state mapping + append-only change log, persisted as one JSON file.
//
// Invariant: records == fold(log). Checked on every load; a file that
// breaks it is reported corrupt and never overwritten by the run.

use crate::error::StoreError;
use crate::record::{number_from_json, GradeRecord, IdentityKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// On-disk format version written by `save`
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// LOG ENTRY
// ============================================================================

/// One recorded change: `previous` is None the first time a key is seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub key: IdentityKey,
    pub previous: Option<GradeRecord>,
    pub current: GradeRecord,
    pub digest: String,
}

impl LogEntry {
    pub fn new(previous: Option<GradeRecord>, current: GradeRecord, timestamp: DateTime<Utc>) -> Self {
        let key = current.identity();
        let digest = record_digest(&key, &current);
        LogEntry {
            id: Uuid::new_v4(),
            timestamp,
            key,
            previous,
            current,
            digest,
        }
    }

    pub fn is_addition(&self) -> bool {
        self.previous.is_none()
    }
}

/// SHA-256 over the key and every field of the recorded value
pub fn record_digest(key: &IdentityKey, record: &GradeRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        key,
        record.course_name().unwrap_or(""),
        record.credit().map(|c| c.to_string()).unwrap_or_default(),
        record.grade().unwrap_or(""),
        record.grade_point().map(|g| g.to_string()).unwrap_or_default(),
        record.course_type().unwrap_or(""),
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// HISTORY STORE
// ============================================================================

/// Latest known record per identity key plus the change log that produced it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStore {
    records: BTreeMap<IdentityKey, GradeRecord>,
    log: Vec<LogEntry>,

    /// Number of log entries already on disk
    persisted_entries: usize,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mapping by folding a log in order
    pub fn from_log(log: Vec<LogEntry>) -> Self {
        let mut records = BTreeMap::new();
        for entry in &log {
            records.insert(entry.key.clone(), entry.current.clone());
        }
        HistoryStore {
            records,
            log,
            persisted_entries: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&GradeRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in `(semester, course_id)` order
    pub fn records(&self) -> impl Iterator<Item = &GradeRecord> {
        self.records.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.records.keys()
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Entries appended since the last load/save
    pub fn pending_entries(&self) -> &[LogEntry] {
        &self.log[self.persisted_entries.min(self.log.len())..]
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending_entries().is_empty()
    }

    /// Record a new value for its key, appending to the log.
    ///
    /// Keys are never removed; recording the value already held is a no-op.
    pub fn record(&mut self, current: GradeRecord, timestamp: DateTime<Utc>) -> Option<&LogEntry> {
        let key = current.identity();
        let previous = self.records.get(&key).cloned();
        if previous.as_ref() == Some(&current) {
            return None;
        }

        self.records.insert(key, current.clone());
        self.log.push(LogEntry::new(previous, current, timestamp));
        self.log.last()
    }

    /// Every enrollment of one course (first attempt and retakes), by semester
    pub fn records_for_course(&self, course_id: &str) -> Vec<&GradeRecord> {
        self.records
            .values()
            .filter(|r| r.course_id() == course_id)
            .collect()
    }

    /// Most recent enrollment of one course (greatest semester)
    pub fn latest_for_course(&self, course_id: &str) -> Option<&GradeRecord> {
        self.records_for_course(course_id).into_iter().last()
    }

    /// Change history of one enrollment, oldest first
    pub fn log_for(&self, key: &IdentityKey) -> Vec<&LogEntry> {
        self.log.iter().filter(|e| &e.key == key).collect()
    }

    /// Derive missing grade points for stored records. Each filled record is
    /// logged like any other update. Returns the number of records changed.
    pub fn backfill_grade_points(&mut self, precision: u32, timestamp: DateTime<Utc>) -> usize {
        let filled: Vec<GradeRecord> = self
            .records
            .values()
            .filter_map(|r| {
                let mut candidate = r.clone();
                candidate.derive_grade_point(precision).then_some(candidate)
            })
            .collect();

        let count = filled.len();
        for record in filled {
            self.record(record, timestamp);
        }
        count
    }

    /// Check that the mapping is exactly the fold of the log
    pub fn verify(&self) -> Result<(), String> {
        let mut folded: BTreeMap<IdentityKey, GradeRecord> = BTreeMap::new();

        for (index, entry) in self.log.iter().enumerate() {
            if entry.current.identity() != entry.key {
                return Err(format!(
                    "log entry {} is keyed {} but records {}",
                    index,
                    entry.key,
                    entry.current.identity()
                ));
            }
            if entry.digest != record_digest(&entry.key, &entry.current) {
                return Err(format!("log entry {} ({}) failed digest check", index, entry.key));
            }
            if folded.get(&entry.key) != entry.previous.as_ref() {
                return Err(format!(
                    "log entry {} ({}) does not follow the previous value",
                    index, entry.key
                ));
            }
            folded.insert(entry.key.clone(), entry.current.clone());
        }

        if folded != self.records {
            return Err(format!(
                "mapping holds {} records but the log folds to {}",
                self.records.len(),
                folded.len()
            ));
        }

        Ok(())
    }

    fn mark_persisted(&mut self) {
        self.persisted_entries = self.log.len();
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    format_version: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    records: BTreeMap<IdentityKey, GradeRecord>,
    log: Vec<LogEntry>,
}

/// Flat course list written by earlier releases (`{"courses": [...]}`)
#[derive(Debug, Deserialize)]
struct LegacyFile {
    courses: Vec<LegacyCourse>,
}

#[derive(Debug, Deserialize)]
struct LegacyCourse {
    #[serde(default)]
    course_id: String,
    #[serde(default)]
    course_name: String,
    #[serde(default)]
    grade: String,
    #[serde(default)]
    gpa: serde_json::Value,
    #[serde(default)]
    term: String,
    #[serde(default)]
    credit: serde_json::Value,
    #[serde(default)]
    course_type: String,
}

impl LegacyCourse {
    fn into_record(self) -> Option<GradeRecord> {
        let mut record = GradeRecord::new(&self.course_id, &self.term)
            .ok()?
            .with_course_name(&self.course_name)
            .with_grade(&self.grade)
            .with_course_type(&self.course_type);
        if let Some(credit) = number_from_json(&self.credit) {
            record = record.with_credit(credit);
        }
        if let Some(gpa) = number_from_json(&self.gpa) {
            record = record.with_grade_point(gpa);
        }
        Some(record)
    }
}

// ============================================================================
// SNAPSHOT STORE (persistence)
// ============================================================================

/// Loads and atomically persists a `HistoryStore` at one path
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file written before the swap; disposable
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the persisted history.
    ///
    /// Missing file → empty store (first run). Anything unreadable or
    /// inconsistent → `StoreError::Corrupt`.
    pub fn load(&self) -> Result<HistoryStore, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no history store yet, starting empty");
                return Ok(HistoryStore::new());
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(StoreError::corrupt(&self.path, format!("not valid UTF-8: {}", e)));
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| StoreError::corrupt(&self.path, format!("invalid JSON: {}", e)))?;

        let store = if value.get("format_version").is_some() {
            self.parse_current(value)?
        } else if value.get("courses").is_some() {
            self.migrate_legacy(value)?
        } else {
            return Err(StoreError::corrupt(
                &self.path,
                "neither `format_version` nor `courses` present",
            ));
        };

        store
            .verify()
            .map_err(|reason| StoreError::corrupt(&self.path, reason))?;

        debug!(
            path = %self.path.display(),
            records = store.len(),
            log_entries = store.log().len(),
            "history store loaded"
        );
        Ok(store)
    }

    fn parse_current(&self, value: serde_json::Value) -> Result<HistoryStore, StoreError> {
        let file: StoreFile = serde_json::from_value(value)
            .map_err(|e| StoreError::corrupt(&self.path, e.to_string()))?;

        if file.format_version != FORMAT_VERSION {
            return Err(StoreError::corrupt(
                &self.path,
                format!("unsupported format_version {}", file.format_version),
            ));
        }

        for (key, record) in &file.records {
            if &record.identity() != key {
                return Err(StoreError::corrupt(
                    &self.path,
                    format!("entry {} holds record {}", key, record.identity()),
                ));
            }
        }

        let persisted_entries = file.log.len();
        Ok(HistoryStore {
            records: file.records,
            log: file.log,
            persisted_entries,
        })
    }

    /// Convert a flat legacy course list into a logged history. The
    /// synthesized entries stay pending until the next save.
    fn migrate_legacy(&self, value: serde_json::Value) -> Result<HistoryStore, StoreError> {
        let legacy: LegacyFile = serde_json::from_value(value)
            .map_err(|e| StoreError::corrupt(&self.path, format!("legacy format: {}", e)))?;

        let now = Utc::now();
        let mut store = HistoryStore::new();
        let mut skipped = 0usize;
        for course in legacy.courses {
            match course.into_record() {
                Some(record) => {
                    store.record(record, now);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, "legacy courses without course_id/term were dropped");
        }
        info!(
            path = %self.path.display(),
            records = store.len(),
            "migrated legacy course list"
        );
        Ok(store)
    }

    /// Persist the full mapping and log.
    ///
    /// Writes a sibling temp file, fsyncs it, then renames it over the
    /// target. Until the rename the previous file stays authoritative.
    pub fn save(&self, store: &mut HistoryStore) -> Result<(), StoreError> {
        let file = StoreFile {
            format_version: FORMAT_VERSION,
            updated_at: Some(Utc::now()),
            records: store.records.clone(),
            log: store.log.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let temp_path = self.temp_path();
        write_synced(&temp_path, &bytes).map_err(|e| StoreError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        sync_parent_dir(&self.path);

        let appended = store.pending_entries().len();
        store.mark_persisted();
        info!(
            path = %self.path.display(),
            records = store.len(),
            appended,
            "history store saved"
        );
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Make the rename itself durable. Best effort: not every platform lets a
/// directory be opened for syncing.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!(dir = %parent.display(), error = %e, "directory fsync skipped");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
