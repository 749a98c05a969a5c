//! Durable, versioned key/value store for one submission's state.
//!
//! Everything the tool needs to survive a restart goes through here: the
//! validation verdict, the submission id and upload target, the completion
//! flag. Writes are crash-safe (write to a temp file, then atomic rename)
//! and the previous on-disk copy is rotated into a numbered backup chain
//! before being replaced.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::workdir::{self, WorkdirError};

pub const CONFIG_FILE_NAME: &str = ".varsub_config.json";

// The full set of known keys. The store is a closed, enumerated mapping,
// not an open-ended attribute bag.
pub const KEY_VERSION: &str = "version";
pub const KEY_METADATA_JSON: &str = "metadata_json";
pub const KEY_VCF_FILES: &str = "vcf_files";
pub const KEY_VALIDATION_RESULTS: &str = "validation_results";
pub const KEY_VALIDATION_DATE: &str = "validation_date";
pub const KEY_READY_FOR_SUBMISSION: &str = "ready_for_submission";
pub const KEY_SUBMISSION_ID: &str = "submission_id";
pub const KEY_SUBMISSION_UPLOAD_URL: &str = "submission_upload_url";
pub const KEY_UPLOADED_FILES: &str = "uploaded_files";
pub const KEY_SUBMISSION_COMPLETE: &str = "submission_complete";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An unreadable store is fatal and never auto-repaired: resetting it
    /// silently could lead to a duplicate submission.
    #[error("config store {path} exists but could not be parsed; \
             fix or remove it before re-running: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not access config store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Backup(#[from] WorkdirError),
}

pub struct SubmissionConfig {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
    backup_retention: Option<usize>,
}

impl SubmissionConfig {
    /// Load the store from disk, or start a fresh one tagged with `version`
    /// if no file exists yet.
    pub fn load(path: &Path, version: &str) -> Result<SubmissionConfig, ConfigError> {
        let entries = if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| ConfigError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            info!("Starting new config store {}", path.display());
            let mut entries = BTreeMap::new();
            entries.insert(KEY_VERSION.to_string(), Value::String(version.to_string()));
            entries
        };
        Ok(SubmissionConfig {
            path: path.to_path_buf(),
            entries,
            backup_retention: None,
        })
    }

    pub fn in_directory(dir: &Path, version: &str) -> Result<SubmissionConfig, ConfigError> {
        SubmissionConfig::load(&dir.join(CONFIG_FILE_NAME), version)
    }

    /// Keep at most `retention` rotated backups of the store file.
    pub fn with_backup_retention(mut self, retention: usize) -> SubmissionConfig {
        self.backup_retention = Some(retention);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.entries.insert(key.to_string(), value);
    }

    /// Rotate the current on-disk copy into the backup chain. A crash after
    /// `backup()` but before the next `write()` leaves the old content
    /// readable under `.1`.
    pub fn backup(&self) -> Result<(), ConfigError> {
        workdir::backup_rotate(&self.path, self.backup_retention)?;
        Ok(())
    }

    /// Flush to disk. Safe to call repeatedly; the on-disk file is either
    /// the previous content or the new content, never a partial write.
    pub fn write(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.to_path_buf(),
            source,
        };
        let text = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            ConfigError::Corrupt {
                path: self.path.to_path_buf(),
                source,
            }
        })?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
