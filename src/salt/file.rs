//! File-backed option store.
//!
//! Each option is one file in a directory. `add` writes the value to a
//! uniquely named temp file and then hard-links it into place; the link
//! fails with `AlreadyExists` if another writer got there first, so a
//! reader never observes a partially written value.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use super::OptionStore;
use crate::error::ConfigurationError;

/// Extension of option files
const OPTION_EXTENSION: &str = "option";

static OPTION_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("option key regex"));

/// Stores options as files under a directory.
#[derive(Debug, Clone)]
pub struct FileOptionStore {
    dir: PathBuf,
}

impl FileOptionStore {
    /// Open (creating if needed) an option directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir.display().to_string(), e))?;
        Ok(FileOptionStore { dir })
    }

    /// Directory holding the option files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn option_path(&self, key: &str) -> Result<PathBuf, ConfigurationError> {
        if !OPTION_KEY_REGEX.is_match(key) {
            return Err(ConfigurationError::Storage {
                key: key.to_string(),
                message: "invalid option key".to_string(),
            });
        }
        Ok(self.dir.join(format!("{key}.{OPTION_EXTENSION}")))
    }

    fn write_temp(&self, key: &str, value: &str) -> io::Result<PathBuf> {
        let temp_path = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        Ok(temp_path)
    }
}

impl OptionStore for FileOptionStore {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        let path = self.option_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    fn add(&self, key: &str, value: &str) -> Result<bool, ConfigurationError> {
        let path = self.option_path(key)?;
        let temp_path = self.write_temp(key, value).map_err(|e| storage_error(key, e))?;

        let linked = fs::hard_link(&temp_path, &path);
        if let Err(e) = fs::remove_file(&temp_path) {
            debug!(target: "salt", error = %e, "failed to remove option temp file");
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(storage_error(key, e)),
        }
    }
}

fn storage_error(key: &str, e: io::Error) -> ConfigurationError {
    ConfigurationError::Storage {
        key: key.to_string(),
        message: e.to_string(),
    }
}
