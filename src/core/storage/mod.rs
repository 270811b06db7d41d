//! Filesystem-backed JSON document storage.
//!
//! Keys are path segments below a root directory; each value is one
//! pretty-printed `.json` file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage result type.
pub type Result<T> = std::result::Result<T, StorageError>;

/// JSON documents under a root directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Storage at the default data location.
    ///
    /// # Errors
    ///
    /// Returns error if data directory cannot be determined.
    pub fn new() -> anyhow::Result<Self> {
        let root = Config::data_dir()?.join("storage");
        Ok(Self { root })
    }

    /// Storage at a custom location.
    #[must_use]
    pub const fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, prefix: &[&str]) -> PathBuf {
        prefix.iter().fold(self.root.clone(), |dir, s| dir.join(s))
    }

    fn path(&self, key: &[&str]) -> PathBuf {
        let mut path = self.dir(key);
        path.set_extension("json");
        path
    }

    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns error if the key is missing or the file cannot be parsed.
    pub fn read<T>(&self, key: &[&str]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = self.path(key);
        if !path.exists() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write a value, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written.
    pub fn write<T>(&self, key: &[&str], value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Check if a key exists.
    #[must_use]
    pub fn exists(&self, key: &[&str]) -> bool {
        self.path(key).exists()
    }

    /// Keys directly under `prefix`, sorted, without the `.json` extension.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read.
    pub fn list(&self, prefix: &[&str]) -> Result<Vec<String>> {
        let dir = self.dir(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Deserialize every value directly under `prefix`.
    ///
    /// Unreadable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read.
    pub fn list_prefix<T>(&self, prefix: &[&str]) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        for key in self.list(prefix)? {
            let mut full: Vec<&str> = prefix.to_vec();
            full.push(&key);
            match self.read(&full) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unreadable entry"),
            }
        }
        Ok(items)
    }
}
