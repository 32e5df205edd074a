//! Persistence for the auth session.
//!
//! The stored session lets a later process resume without signing in again.
//! Storage also carries small string flags, such as the legacy
//! `isAuthenticated` marker, which other tools read but never trust: the
//! auth store stays the source of truth.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::types::Session;

/// Flag mirrored from the auth store, `"1"` or `"0"`.
pub const IS_AUTHENTICATED_KEY: &str = "isAuthenticated";

/// Errors raised by a [`SessionStorage`] backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Where the session and flags live between runs.
pub trait SessionStorage: Send + Sync {
    /// Load the persisted session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_session(&self) -> Result<Option<Session>, StorageError>;

    /// Persist `session`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn save_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Forget the persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn clear_session(&self) -> Result<(), StorageError>;

    /// Read a flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn flag(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set_flag(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Stored {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    flags: BTreeMap<String, String>,
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<Stored>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load_session(&self) -> Result<Option<Session>, StorageError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .clone())
    }

    fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), StorageError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session = None;
        Ok(())
    }

    fn flag(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .get(key)
            .cloned())
    }

    fn set_flag(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON file storage, rewritten atomically on every change.
///
/// The file holds the refresh token; on unix it is readable by the owner
/// only. A corrupt file is replaced by the next write.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Stored, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Stored::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Stored::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, stored: &Stored) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        #[cfg(unix)]
        {
            // A leftover temp file keeps its old mode.
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&serde_json::to_vec_pretty(stored)?)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut Stored)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stored = match self.read() {
            Err(StorageError::Corrupt(e)) => {
                warn!(path = %self.path.display(), error = %e, "Session file corrupt, replacing it");
                Stored::default()
            }
            other => other?,
        };
        change(&mut stored);
        self.write(&stored)
    }
}

impl SessionStorage for FileStorage {
    fn load_session(&self) -> Result<Option<Session>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.session)
    }

    fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.update(|stored| stored.session = Some(session.clone()))
    }

    fn clear_session(&self) -> Result<(), StorageError> {
        self.update(|stored| stored.session = None)
    }

    fn flag(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.flags.get(key).cloned())
    }

    fn set_flag(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|stored| {
            stored.flags.insert(key.to_string(), value.to_string());
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::supabase::types::RemoteUser;
    use pipecrm_core::UserId;

    fn session() -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_in: Some(3600),
            expires_at: Some(10_000),
            user: RemoteUser {
                id: UserId::random(),
                email: Some("ana@pipecrm.dev".into()),
                app_metadata: serde_json::Map::new(),
                user_metadata: serde_json::Map::new(),
            },
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pipecrm-{name}-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert!(storage.load_session().unwrap().is_none());

        let session = session();
        storage.save_session(&session).unwrap();
        assert_eq!(storage.load_session().unwrap(), Some(session));

        storage.clear_session().unwrap();
        assert!(storage.load_session().unwrap().is_none());
    }

    #[test]
    fn test_memory_storage_flags() {
        let storage = MemoryStorage::new();
        assert!(storage.flag(IS_AUTHENTICATED_KEY).unwrap().is_none());
        storage.set_flag(IS_AUTHENTICATED_KEY, "1").unwrap();
        assert_eq!(storage.flag(IS_AUTHENTICATED_KEY).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let path = temp_path("persist");
        let session = session();

        FileStorage::new(&path).save_session(&session).unwrap();
        FileStorage::new(&path)
            .set_flag(IS_AUTHENTICATED_KEY, "1")
            .unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.load_session().unwrap(), Some(session));
        assert_eq!(reopened.flag(IS_AUTHENTICATED_KEY).unwrap().as_deref(), Some("1"));

        reopened.clear_session().unwrap();
        assert!(reopened.load_session().unwrap().is_none());
        assert_eq!(reopened.flag(IS_AUTHENTICATED_KEY).unwrap().as_deref(), Some("1"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let storage = FileStorage::new(temp_path("missing"));
        assert!(storage.load_session().unwrap().is_none());
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{not json").unwrap();
        let err = FileStorage::new(&path).load_session().unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_storage_writes_replace_corrupt_file() {
        let path = temp_path("truncated");
        std::fs::write(&path, b"{ truncated").unwrap();
        let storage = FileStorage::new(&path);

        storage.clear_session().unwrap();
        storage.set_flag(IS_AUTHENTICATED_KEY, "0").unwrap();
        assert!(storage.load_session().unwrap().is_none());

        let session = session();
        storage.save_session(&session).unwrap();
        assert_eq!(storage.load_session().unwrap(), Some(session));
        assert_eq!(storage.flag(IS_AUTHENTICATED_KEY).unwrap().as_deref(), Some("0"));

        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("private");
        let storage = FileStorage::new(&path);
        storage.save_session(&session()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_file(&path).unwrap();
    }
}
