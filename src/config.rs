//! Task and scheduler configuration.
//!
//! Configuration is plain data: tasks take it by value, schedulers own a
//! copy for the lifetime of a run, and the CLI can read the whole thing
//! from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::filter::{FilterSet, FilterSpec};

pub const DEFAULT_PACKAGE_FILE_NAME: &str = "backup.pkg";

/// Parameters shared by backup and restore runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub filters: FilterSpec,
    pub compress_enabled: bool,
    pub package_enabled: bool,
    pub package_file_name: String,
    /// Empty string disables encryption.
    pub password: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            destination_dir: PathBuf::new(),
            filters: FilterSpec::default(),
            compress_enabled: false,
            package_enabled: false,
            package_file_name: DEFAULT_PACKAGE_FILE_NAME.to_string(),
            password: String::new(),
        }
    }
}

impl BackupConfig {
    pub fn new(source_dir: impl Into<PathBuf>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            ..Self::default()
        }
    }

    pub fn encryption_enabled(&self) -> bool {
        !self.password.is_empty()
    }

    /// Name of the encrypted package artifact.
    pub fn encrypted_package_name(&self) -> String {
        format!("{}.enc", self.package_file_name)
    }

    /// Compiles the declarative filter spec into the runtime chain.
    pub fn compiled_filters(&self) -> Result<FilterSet, BackupError> {
        self.filters.compile()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, BackupError> {
        let text = fs::read_to_string(path).map_err(|e| BackupError::io(e, path))?;
        serde_json::from_str(&text).map_err(|e| {
            BackupError::io(
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                path,
            )
        })
    }
}

/// Periodic-scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub backup: BackupConfig,
    pub interval_seconds: u64,
}

/// Change-driven-scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub backup: BackupConfig,
    pub debounce_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = BackupConfig::default();
        assert_eq!(cfg.package_file_name, "backup.pkg");
        assert!(!cfg.encryption_enabled());
        assert!(cfg.filters.is_empty());
    }

    #[test]
    fn json_round_trip() {
        let mut cfg = BackupConfig::new("/src", "/dst");
        cfg.compress_enabled = true;
        cfg.password = "pw".into();
        cfg.filters.extensions = vec!["txt".into()];

        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let parsed: BackupConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source_dir, PathBuf::from("/src"));
        assert!(parsed.compress_enabled);
        assert!(parsed.encryption_enabled());
        assert_eq!(parsed.filters.extensions, vec!["txt".to_string()]);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let parsed: BackupConfig =
            serde_json::from_str(r#"{"source_dir": "/a", "destination_dir": "/b"}"#).unwrap();
        assert_eq!(parsed.package_file_name, "backup.pkg");
        assert!(!parsed.package_enabled);
    }
}
