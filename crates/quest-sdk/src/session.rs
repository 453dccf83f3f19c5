use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::BaseDirs;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const SESSION_FILE: &str = "session.toml";

/// Durable key-value home of the session id.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StoreError>;
    fn save(&self, session_id: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Stores the session id in `<dir>/session.toml`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(SESSION_FILE),
        }
    }

    /// `~/.quest/session.toml`.
    pub fn in_home() -> Result<Self, StoreError> {
        let base = BaseDirs::new().ok_or(StoreError::NoHomeDir)?;
        Ok(Self::new(base.home_dir().join(".quest")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStorage for FileSessionStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| self.io_error(err))?;
        let record: SessionRecord = toml::from_str(&raw)?;
        Ok(record.session_id.filter(|id| !id.trim().is_empty()))
    }

    fn save(&self, session_id: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        let serialized = toml::to_string_pretty(&SessionRecord {
            session_id: Some(session_id.to_string()),
        })?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(|err| self.io_error(err))?;
        file.write_all(serialized.as_bytes())
            .map_err(|err| self.io_error(err))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file
                .metadata()
                .map_err(|err| self.io_error(err))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms).map_err(|err| self.io_error(err))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

/// Process-lifetime storage.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    value: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(session_id.into())),
        }
    }
}

impl SessionStorage for MemorySessionStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.value.lock().clone())
    }

    fn save(&self, session_id: &str) -> Result<(), StoreError> {
        *self.value.lock() = Some(session_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.value.lock() = None;
        Ok(())
    }
}

/// The session id currently held by this client, written through to storage.
pub struct SessionHandle {
    current: RwLock<Option<String>>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionHandle {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let current = match storage.load() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(
                    target: "quest::session",
                    error = %err,
                    "failed to load persisted session; starting without one"
                );
                None
            }
        };
        Self {
            current: RwLock::new(current),
            storage,
        }
    }

    pub fn id(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn set(&self, session_id: &str) -> Result<(), StoreError> {
        *self.current.write() = Some(session_id.to_string());
        self.storage.save(session_id)
    }

    /// Returns true if a session was held before the call.
    pub fn clear(&self) -> bool {
        let previous = self.current.write().take();
        if let Err(err) = self.storage.clear() {
            tracing::warn!(
                target: "quest::session",
                error = %err,
                "failed to remove persisted session"
            );
        }
        previous.is_some()
    }

    /// Re-reads durable storage, picking up an id written by another run.
    pub fn reload(&self) -> Result<Option<String>, StoreError> {
        let loaded = self.storage.load()?;
        *self.current.write() = loaded.clone();
        Ok(loaded)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}
