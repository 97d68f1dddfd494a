//! Centralized configuration for TagVault.
//!
//! Constant groups for the database, tag normalization and paths, plus the
//! runtime `EngineOptions` a library is opened with.

use crate::error::{Result, TagVaultError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "TagVault";
}

/// SQLite connection settings.
pub struct DatabaseConfig;

impl DatabaseConfig {
    pub const BUSY_TIMEOUT_MS: u32 = 30_000;
    /// Capacity of the writer's command channel.
    pub const WRITER_QUEUE_DEPTH: usize = 64;
    /// Capacity of the post-commit notification broadcast.
    pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;
}

/// Tag normalization limits.
pub struct TagConfig;

impl TagConfig {
    /// Longest tag (namespace, colon and subtag) accepted, in characters.
    pub const MAX_TAG_LENGTH: usize = 1024;
}

/// Identifier cache sizing.
pub struct CacheConfig;

impl CacheConfig {
    pub const HASH_CACHE_CAPACITY: u64 = 100_000;
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const DB_FILE_NAME: &'static str = "client.db";
    pub const OPTIONS_FILE_NAME: &'static str = "options.json";
    pub const DATA_DIR_NAME: &'static str = "tagvault";
}

/// Runtime options for an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Archived files may not be deleted from local file services.
    pub delete_lock_for_archived_files: bool,
    /// Write deletion reasons for local deletes.
    pub record_deletion_reasons: bool,
    /// Default reason used when a local delete carries none.
    pub default_deletion_reason: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            delete_lock_for_archived_files: false,
            record_deletion_reasons: true,
            default_deletion_reason: "Deleted from the client.".to_string(),
        }
    }
}

impl EngineOptions {
    /// Load options from a JSON file, falling back to defaults for any
    /// missing field.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TagVaultError::io_with_path(e, path))?;
        let options = serde_json::from_str(&text).map_err(|e| TagVaultError::Config {
            message: format!("Invalid options file {}: {}", path.display(), e),
        })?;
        Ok(options)
    }

    /// Load options if the file exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| TagVaultError::io_with_path(e, path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_options_partial_json_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        std::fs::write(&path, r#"{"delete_lock_for_archived_files": true}"#).unwrap();

        let options = EngineOptions::load(&path).unwrap();
        assert!(options.delete_lock_for_archived_files);
        assert!(options.record_deletion_reasons);
    }

    #[test]
    fn test_options_roundtrip_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        let options = EngineOptions {
            delete_lock_for_archived_files: true,
            ..Default::default()
        };
        options.save(&path).unwrap();
        assert_eq!(EngineOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_missing_options_file_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let options =
            EngineOptions::load_or_default(&temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(options, EngineOptions::default());
    }
}
