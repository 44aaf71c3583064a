// ⚙️ Configuration - plain values handed to the core
// TOML on disk, every field defaulted; CLI flags override after loading.

use crate::error::ConfigError;
use crate::fetcher::SnapshotFormat;
use crate::reconciliation::ReconcilePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "grade-watch.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persisted history (mapping + change log)
    pub store_path: PathBuf,

    /// Snapshot produced by the portal fetch step
    pub snapshot_path: PathBuf,

    pub snapshot_format: SnapshotFormat,

    pub policy: PolicyConfig,

    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_path: PathBuf::from("course_data.json"),
            snapshot_path: PathBuf::from("current.json"),
            snapshot_format: SnapshotFormat::Auto,
            policy: PolicyConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Report stored courses missing from a snapshot as events
    pub escalate_missing: bool,

    /// Notify additions found on the very first run (empty store)
    pub notify_on_first_run: bool,

    /// Fill unknown grade points from numeric grades before reconciling
    pub derive_grade_point: bool,

    pub grade_point_precision: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            escalate_missing: false,
            notify_on_first_run: false,
            derive_grade_point: true,
            grade_point_precision: 3,
        }
    }
}

impl PolicyConfig {
    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            escalate_missing: self.escalate_missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub console: bool,
    pub smtp: Option<SmtpConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            console: true,
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (usually port 587)
    #[default]
    Starttls,
    /// Implicit TLS (usually port 465)
    Ssl,
    /// No encryption; local relays only
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    20
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_path is empty".to_string()));
        }
        if self.policy.grade_point_precision > 12 {
            return Err(ConfigError::Invalid(format!(
                "grade_point_precision {} is above 12",
                self.policy.grade_point_precision
            )));
        }
        if let Some(smtp) = &self.notify.smtp {
            for (name, value) in [("server", &smtp.server), ("from", &smtp.from), ("to", &smtp.to)] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("notify.smtp.{} is empty", name)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.notify.console);
        assert!(config.policy.derive_grade_point);
    }

    #[test]
    fn test_parse_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grade-watch.toml");
        fs::write(
            &path,
            r#"
store_path = "data/history.json"
snapshot_path = "data/grades.csv"
snapshot_format = "csv"

[policy]
escalate_missing = true
notify_on_first_run = true

[notify]
console = false

[notify.smtp]
server = "smtp.example.edu"
port = 465
username = "student"
password = "secret"
from = "watch@example.edu"
to = "student@example.edu"
security = "ssl"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store_path, PathBuf::from("data/history.json"));
        assert_eq!(config.snapshot_format, SnapshotFormat::Csv);
        assert!(config.policy.reconcile_policy().escalate_missing);
        assert_eq!(config.policy.grade_point_precision, 3);
        let smtp = config.notify.smtp.unwrap();
        assert_eq!(smtp.security, SmtpSecurity::Ssl);
        assert_eq!(smtp.port, 465);
        assert_eq!(smtp.timeout_secs, 20);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grade-watch.toml");
        fs::write(&path, "store_path = [").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_smtp_requires_addresses() {
        let mut config = Config::default();
        config.notify.smtp = Some(SmtpConfig {
            server: "smtp.example.edu".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: "student@example.edu".to_string(),
            security: SmtpSecurity::Starttls,
            timeout_secs: 20,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
