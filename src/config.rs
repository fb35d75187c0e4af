use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Ledgerload";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    "ledgerload_lib=info,ledgerload=info,warn".to_string()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

/// Which workload the harness runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Full import/index/patch run against a remote document store.
    Raven,
    /// Same phases against the in-process store (dry run).
    Memory,
    /// Disk write benchmark only.
    File,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raven => write!(f, "Raven"),
            Self::Memory => write!(f, "Memory"),
            Self::File => write!(f, "File"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raven" => Ok(Self::Raven),
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(format!("unknown mode {other:?} (expected raven, memory or file)")),
        }
    }
}

/// Harness settings, read from `appsettings.json`.
///
/// Keys are PascalCase so existing settings files keep working. Every field
/// has a default, so a partial (or absent) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HarnessSettings {
    pub mode: RunMode,
    /// Free-text note copied into the run report.
    pub note: String,
    pub database_id: String,
    #[serde(rename = "RavenURL")]
    pub raven_url: String,
    /// PKCS#12 client certificate for the store, if it requires one.
    pub cert_path: Option<PathBuf>,
    pub cert_password: String,

    pub import_docs: bool,
    pub minimum_document_count: u64,
    pub max_insert_threads: usize,
    pub count_of_docs_to_insert_per_thread: u64,

    pub create_indexes: bool,
    pub patch_docs: bool,
    pub wait_for_indexes_to_not_be_stale: bool,
    pub poll_interval_secs: u64,
    /// Random extra delay, up to this many milliseconds, added to each poll.
    pub poll_jitter_ms: u64,
    /// Upper bound on a single convergence wait. Absent means wait forever.
    pub max_index_wait_secs: Option<u64>,
    /// Payments with an amount below this are tagged by the patch phase.
    pub patch_amount_threshold: f64,

    /// Scratch directory for `File` mode. A temporary directory when unset.
    pub temp_dir: Option<PathBuf>,
    #[serde(rename = "LargeFileSizeInGB")]
    pub large_file_size_in_gb: f64,
    #[serde(rename = "SmallFileSizeInGB")]
    pub small_file_size_in_gb: f64,
    pub count_of_small_files_to_write: u32,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Raven,
            note: String::new(),
            database_id: "LedgerLoad".to_string(),
            raven_url: "http://127.0.0.1:8080".to_string(),
            cert_path: None,
            cert_password: String::new(),
            import_docs: true,
            minimum_document_count: 100_000,
            max_insert_threads: 4,
            count_of_docs_to_insert_per_thread: 10_000,
            create_indexes: true,
            patch_docs: true,
            wait_for_indexes_to_not_be_stale: true,
            poll_interval_secs: 5,
            poll_jitter_ms: 0,
            max_index_wait_secs: None,
            patch_amount_threshold: -5000.0,
            temp_dir: None,
            large_file_size_in_gb: 0.001,
            small_file_size_in_gb: 0.000_01,
            count_of_small_files_to_write: 100,
        }
    }
}

impl HarnessSettings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %shown, "Settings file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path: shown, source }),
        };

        let settings: Self = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: shown, source })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_insert_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "MaxInsertThreads",
                reason: "must be at least 1".into(),
            });
        }
        if self.count_of_docs_to_insert_per_thread == 0 {
            return Err(ConfigError::Invalid {
                field: "CountOfDocsToInsertPerThread",
                reason: "must be at least 1".into(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "PollIntervalSecs",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.database_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "DatabaseId",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }

    pub fn max_index_wait(&self) -> Option<Duration> {
        self.max_index_wait_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn app_name_is_ledgerload() {
        assert_eq!(APP_NAME, "Ledgerload");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn defaults_are_valid() {
        HarnessSettings::default().validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HarnessSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.mode, RunMode::Raven);
        assert_eq!(settings.max_insert_threads, 4);
    }

    #[test]
    fn reads_pascal_case_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "Mode": "Memory",
                "DatabaseId": "Bench",
                "RavenURL": "https://a.example:443",
                "MinimumDocumentCount": 5000,
                "MaxInsertThreads": 8,
                "CountOfDocsToInsertPerThread": 250,
                "LargeFileSizeInGB": 0.5,
                "MaxIndexWaitSecs": 60
            }}"#
        )
        .unwrap();

        let settings = HarnessSettings::load(file.path()).unwrap();
        assert_eq!(settings.mode, RunMode::Memory);
        assert_eq!(settings.database_id, "Bench");
        assert_eq!(settings.raven_url, "https://a.example:443");
        assert_eq!(settings.minimum_document_count, 5000);
        assert_eq!(settings.max_insert_threads, 8);
        assert_eq!(settings.count_of_docs_to_insert_per_thread, 250);
        assert!((settings.large_file_size_in_gb - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.max_index_wait(), Some(Duration::from_secs(60)));
        // Untouched keys keep defaults
        assert!(settings.patch_docs);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = HarnessSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_threads_rejected() {
        let settings = HarnessSettings {
            max_insert_threads: 0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("MaxInsertThreads"));
    }

    #[test]
    fn zero_per_thread_cap_rejected() {
        let settings = HarnessSettings {
            count_of_docs_to_insert_per_thread: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let settings = HarnessSettings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "PollIntervalSecs", .. }));
    }

    #[test]
    fn blank_database_id_rejected() {
        let settings = HarnessSettings {
            database_id: "   ".into(),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "DatabaseId", .. }));
    }

    #[test]
    fn run_mode_parses_case_insensitively() {
        assert_eq!("raven".parse::<RunMode>().unwrap(), RunMode::Raven);
        assert_eq!("MEMORY".parse::<RunMode>().unwrap(), RunMode::Memory);
        assert_eq!("File".parse::<RunMode>().unwrap(), RunMode::File);
        assert!("disk".parse::<RunMode>().is_err());
    }
}
