// 🚨 Error Taxonomy
// One enum per concern; the run-level WatchError wraps the fatal ones.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// RECORD ERRORS
// ============================================================================

/// Rejected construction of a `GradeRecord` or `IdentityKey`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("grade record is missing course_id")]
    MissingCourseId,

    #[error("grade record is missing semester")]
    MissingSemester,

    #[error("course_id `{0}` must not contain `|`")]
    InvalidCourseId(String),

    #[error("malformed identity key `{0}` (expected `course_id|semester`)")]
    MalformedKey(String),
}

// ============================================================================
// STORE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    /// Persisted history exists but cannot be trusted. Fatal: nothing is
    /// fetched and nothing is written.
    #[error("history store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("history store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize history store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

// ============================================================================
// FETCH ERRORS
// ============================================================================

/// Why no snapshot is available for this run
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("portal rejected the session: {0}")]
    Auth(String),

    #[error("network failure while fetching grades: {0}")]
    Network(String),

    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("cannot read snapshot source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Short machine-friendly label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Auth(_) => "auth",
            FetchError::Network(_) => "network",
            FetchError::UnexpectedShape(_) => "unexpected_shape",
            FetchError::Source { .. } => "source",
        }
    }
}

// ============================================================================
// NOTIFY ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{channel} delivery failed: {message}")]
pub struct NotifyError {
    pub channel: String,
    pub message: String,
}

impl NotifyError {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        NotifyError {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// CONFIG ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// RUN ERRORS
// ============================================================================

/// Errors that abort a run before the store is mutated
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kind_labels() {
        assert_eq!(FetchError::Auth("expired".into()).kind(), "auth");
        assert_eq!(FetchError::Network("timeout".into()).kind(), "network");
        assert_eq!(
            FetchError::UnexpectedShape("no cjxx".into()).kind(),
            "unexpected_shape"
        );
    }

    #[test]
    fn test_watch_error_wraps_store_corruption() {
        let err: WatchError = StoreError::corrupt("course_data.json", "bad json").into();
        assert!(matches!(err, WatchError::Store(ref e) if e.is_corrupt()));
        assert!(err.to_string().contains("course_data.json"));
    }

    #[test]
    fn test_notify_error_display() {
        let err = NotifyError::new("smtp", "connection refused");
        assert_eq!(err.to_string(), "smtp delivery failed: connection refused");
    }
}
