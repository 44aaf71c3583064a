// 🔁 Watcher - one batch run
// load → fetch → reconcile → save → notify
//
// Load and fetch failures abort before anything is written. Notification
// failures happen after the save and never undo it, so a retried run sees
// no new changes instead of re-sending delivered ones.

use crate::config::PolicyConfig;
use crate::error::WatchError;
use crate::fetcher::Fetcher;
use crate::notifier::{deliver, Notifier, NotifyResult};
use crate::reconciliation::{ChangeEvent, ChangeKind, Reconciler};
use crate::record::IdentityKey;
use crate::store::SnapshotStore;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Records returned by the fetcher, before deduplication
    pub fetched: usize,

    /// The store was empty before this run
    pub first_run: bool,

    pub changes: Vec<ChangeEvent>,

    /// Stored enrollments the snapshot did not contain (anomaly)
    pub missing: Vec<IdentityKey>,

    pub duplicates_collapsed: usize,

    /// Fetched records whose grade point was derived from the score
    pub grade_points_derived: usize,

    /// The store file was rewritten
    pub persisted: bool,

    pub notify: NotifyResult,
}

impl RunReport {
    pub fn anomaly_count(&self) -> usize {
        self.missing.len()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind() == kind).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "fetched {} records: {} added, {} updated, {} missing; {} notified, {} suppressed, {} unsent, {} failed",
            self.fetched,
            self.count(ChangeKind::Added),
            self.count(ChangeKind::Updated),
            self.anomaly_count(),
            self.notify.delivered,
            self.notify.suppressed,
            self.notify.skipped,
            self.notify.failures.len()
        )
    }
}

// ============================================================================
// WATCHER
// ============================================================================

pub struct Watcher<'a> {
    store: SnapshotStore,
    fetcher: &'a dyn Fetcher,
    notifier: &'a dyn Notifier,
    policy: PolicyConfig,
}

impl<'a> Watcher<'a> {
    pub fn new(store: SnapshotStore, fetcher: &'a dyn Fetcher, notifier: &'a dyn Notifier) -> Self {
        Watcher {
            store,
            fetcher,
            notifier,
            policy: PolicyConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&self) -> Result<RunReport, WatchError> {
        let started_at = Utc::now();

        // 1. Load - a corrupt store stops the run before any fetch
        let history = self.store.load().map_err(|e| {
            error!(path = %self.store.path().display(), error = %e, "cannot load history store");
            e
        })?;
        let first_run = history.is_empty();

        // 2. Fetch
        info!(source = %self.fetcher.describe(), "fetching grades");
        let mut snapshot = self.fetcher.fetch().map_err(|e| {
            error!(kind = e.kind(), error = %e, "fetch failed, store left untouched");
            e
        })?;
        let fetched = snapshot.len();

        let mut grade_points_derived = 0;
        if self.policy.derive_grade_point {
            for record in snapshot.iter_mut() {
                if record.derive_grade_point(self.policy.grade_point_precision) {
                    grade_points_derived += 1;
                }
            }
        }

        // 3. Reconcile
        let reconciler = Reconciler::with_policy(self.policy.reconcile_policy());
        let mut reconciliation = reconciler.reconcile(&history, snapshot);
        info!("{}", reconciliation.summary());

        if !reconciliation.missing.is_empty() {
            let keys: Vec<String> = reconciliation.missing.iter().map(|k| k.to_string()).collect();
            warn!(
                count = keys.len(),
                keys = %keys.join(", "),
                "stored courses absent from the latest snapshot"
            );
        }

        // 4. Persist
        let persisted = reconciliation.store.has_pending_changes();
        if persisted {
            self.store.save(&mut reconciliation.store)?;
        }

        // 5. Notify
        let suppress_added = first_run && !self.policy.notify_on_first_run;
        let (to_send, suppressed): (Vec<ChangeEvent>, Vec<ChangeEvent>) = reconciliation
            .changes
            .iter()
            .cloned()
            .partition(|c| !(suppress_added && c.kind() == ChangeKind::Added));

        if !suppressed.is_empty() {
            info!(
                count = suppressed.len(),
                "first run: recorded existing grades without notifying"
            );
        }

        let mut notify = deliver(self.notifier, &to_send);
        notify.suppressed = suppressed.len();

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            fetched,
            first_run,
            changes: reconciliation.changes,
            missing: reconciliation.missing,
            duplicates_collapsed: reconciliation.duplicates_collapsed,
            grade_points_derived,
            persisted,
            notify,
        })
    }
}
