// ⚖️ Reconciliation Engine - fresh snapshot vs stored history
//
// 1. Collapse duplicate identity keys inside the snapshot (last one wins)
// 2. Unknown key → Added, differing content → Updated, equal → nothing
// 3. Stored keys absent from the snapshot are an anomaly, never a removal
// 4. Fold Added/Updated onto a copy of the store
// 5. Changes ordered by (semester, course_id)
//
// Running it twice with the same snapshot yields no changes the second time.

use crate::record::{GradeRecord, IdentityKey};
use crate::store::HistoryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ============================================================================
// CHANGE EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Updated,
    /// Stored enrollment absent from the snapshot (only with escalation on)
    Missing,
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Updated => "updated",
            ChangeKind::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Added {
        record: GradeRecord,
    },
    Updated {
        previous: GradeRecord,
        current: GradeRecord,
    },
    Missing {
        previous: GradeRecord,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Added { .. } => ChangeKind::Added,
            ChangeEvent::Updated { .. } => ChangeKind::Updated,
            ChangeEvent::Missing { .. } => ChangeKind::Missing,
        }
    }

    /// The record as it stands after this event
    pub fn record(&self) -> &GradeRecord {
        match self {
            ChangeEvent::Added { record } => record,
            ChangeEvent::Updated { current, .. } => current,
            ChangeEvent::Missing { previous } => previous,
        }
    }

    pub fn previous(&self) -> Option<&GradeRecord> {
        match self {
            ChangeEvent::Added { .. } => None,
            ChangeEvent::Updated { previous, .. } | ChangeEvent::Missing { previous } => {
                Some(previous)
            }
        }
    }

    pub fn key(&self) -> IdentityKey {
        self.record().identity()
    }

    /// Whether this event changes the stored history
    pub fn mutates_store(&self) -> bool {
        !matches!(self, ChangeEvent::Missing { .. })
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record();
        match self {
            ChangeEvent::Added { .. } => write!(
                f,
                "[added] {} ({}): {}",
                record.display_name(),
                record.semester(),
                record.grade().unwrap_or("-")
            ),
            ChangeEvent::Updated { previous, current } => write!(
                f,
                "[updated] {} ({}): {} → {}",
                current.display_name(),
                current.semester(),
                previous.grade().unwrap_or("-"),
                current.grade().unwrap_or("-")
            ),
            ChangeEvent::Missing { .. } => write!(
                f,
                "[missing] {} ({}): last seen {}",
                record.display_name(),
                record.semester(),
                record.grade().unwrap_or("-")
            ),
        }
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Ordered by (semester, course_id)
    pub changes: Vec<ChangeEvent>,

    /// Prior store with every Added/Updated folded in
    pub store: HistoryStore,

    /// Stored keys the snapshot did not contain
    pub missing: Vec<IdentityKey>,

    /// Snapshot entries dropped because a later entry shared their key
    pub duplicates_collapsed: usize,

    /// Distinct identity keys in the snapshot
    pub snapshot_size: usize,
}

impl Reconciliation {
    pub fn anomaly_count(&self) -> usize {
        self.missing.len()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind() == kind).count()
    }

    pub fn is_unchanged(&self) -> bool {
        self.changes.iter().all(|c| !c.mutates_store())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} courses fetched: {} added, {} updated, {} missing, {} duplicates collapsed",
            self.snapshot_size,
            self.count(ChangeKind::Added),
            self.count(ChangeKind::Updated),
            self.anomaly_count(),
            self.duplicates_collapsed
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Report stored keys absent from the snapshot as `Missing` events
    #[serde(default)]
    pub escalate_missing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    pub policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ReconcilePolicy) -> Self {
        Reconciler { policy }
    }

    /// Reconcile a fetched snapshot against the stored history
    pub fn reconcile(&self, store: &HistoryStore, snapshot: Vec<GradeRecord>) -> Reconciliation {
        self.reconcile_at(store, snapshot, Utc::now())
    }

    /// Same as `reconcile` with an explicit log timestamp
    pub fn reconcile_at(
        &self,
        store: &HistoryStore,
        snapshot: Vec<GradeRecord>,
        timestamp: DateTime<Utc>,
    ) -> Reconciliation {
        let fetched_count = snapshot.len();
        let latest = collapse_duplicates(snapshot);
        let duplicates_collapsed = fetched_count - latest.len();

        let mut changes = Vec::new();
        for (key, fetched) in &latest {
            match store.get(key) {
                None => changes.push(ChangeEvent::Added {
                    record: fetched.clone(),
                }),
                Some(stored) if GradeRecord::content_equal(stored, fetched) => {}
                Some(stored) => changes.push(ChangeEvent::Updated {
                    previous: stored.clone(),
                    current: stored.merged_with(fetched),
                }),
            }
        }

        let missing: Vec<IdentityKey> = store
            .keys()
            .filter(|key| !latest.contains_key(*key))
            .cloned()
            .collect();

        if self.policy.escalate_missing {
            for key in &missing {
                if let Some(previous) = store.get(key) {
                    changes.push(ChangeEvent::Missing {
                        previous: previous.clone(),
                    });
                }
            }
        }

        changes.sort_by_key(|c| c.key());

        let mut updated = store.clone();
        for change in changes.iter().filter(|c| c.mutates_store()) {
            debug!(key = %change.key(), kind = change.kind().label(), "grade change");
            updated.record(change.record().clone(), timestamp);
        }

        Reconciliation {
            changes,
            store: updated,
            missing,
            duplicates_collapsed,
            snapshot_size: latest.len(),
        }
    }
}

/// One record per identity key; a later entry replaces an earlier one
fn collapse_duplicates(snapshot: Vec<GradeRecord>) -> BTreeMap<IdentityKey, GradeRecord> {
    let mut latest = BTreeMap::new();
    for record in snapshot {
        if let Some(replaced) = latest.insert(record.identity(), record) {
            debug!(key = %replaced.identity(), "duplicate snapshot entry replaced by later one");
        }
    }
    latest
}

// ============================================================================
// TESTS
// ============================================================================
