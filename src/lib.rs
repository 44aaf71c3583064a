// Grade Watch - Core Library
// Change detection for university grade records: fetch a snapshot,
// reconcile it against stored history, persist, notify.

pub mod error;
pub mod record;         // Record Model - identity + comparison
pub mod store;          // Snapshot Store - history log + atomic persistence
pub mod reconciliation; // Reconciler - dedup + diff
pub mod fetcher;        // Snapshot sources
pub mod notifier;       // Delivery channels
pub mod config;
pub mod logging;
pub mod watcher;        // One batch run

// Re-export commonly used types
pub use error::{
    ConfigError, FetchError, NotifyError, RecordError, StoreError, WatchError,
};
pub use record::{GradeRecord, IdentityKey};
pub use store::{HistoryStore, LogEntry, SnapshotStore};
pub use reconciliation::{
    ChangeEvent, ChangeKind, ReconcilePolicy, Reconciler, Reconciliation,
};
pub use fetcher::{
    open_fetcher, parse_portal_response,
    CsvFetcher, Fetcher, PortalDumpFetcher, SnapshotFormat, StaticFetcher,
};
pub use notifier::{
    deliver, ConsoleNotifier, MemoryNotifier, MultiNotifier,
    Notification, Notifier, NotifyResult,
};
pub use config::{Config, NotifyConfig, PolicyConfig, SmtpConfig, SmtpSecurity};
pub use watcher::{RunReport, Watcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
