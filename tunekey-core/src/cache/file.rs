//! File-backed credential cache.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{StoreError, TokenCache};
use crate::config::AuthConfig;
use crate::model::Credentials;

/// Single JSON credential record on disk.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the record, so a crash never leaves a corrupt or partial
/// record. On Unix the file is created with `0600` permissions.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    /// Create a cache at a specific path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a cache at the platform-default location.
    pub fn at_default_location() -> Self {
        Self::new(AuthConfig::default_cache_path())
    }

    /// The path of the persisted record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl TokenCache for FileCache {
    async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let credentials = serde_json::from_str(&contents)?;
        Ok(Some(credentials))
    }

    async fn store(&self, credentials: &Credentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let json = serde_json::to_string_pretty(credentials)?;
        let temp = self.temp_path();

        let write_result = (|| {
            std::fs::write(&temp, &json)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))?;
            }
            std::fs::rename(&temp, &self.path)
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&temp);
            return Err(self.io_error(e));
        }

        tracing::debug!(path = %self.path.display(), "persisted credential record");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed credential record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
