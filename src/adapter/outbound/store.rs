//! File-backed session store.
//!
//! One pretty-printed JSON record per account context under
//! `<state_dir>/sessions/<profile>@<region>.json`, with the name escaped
//! by [`AccountContext::file_stem`].

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{AccountContext, ClusterSession};
use crate::error::{Error, Result};
use crate::port::SessionStore;

/// Stores the session record as a JSON file, replaced atomically.
pub struct FileSessionStore {
    path: PathBuf,
    account: AccountContext,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(state_dir: impl AsRef<Path>, account: AccountContext) -> Self {
        let path = state_dir
            .as_ref()
            .join("sessions")
            .join(format!("{}.json", account.file_stem()));
        Self {
            path,
            account,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl ToString) -> Error {
        Error::CorruptSession {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &ClusterSession) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;

        let cleanup_and_err = |e| {
            let _ = fs::remove_file(&temp_path);
            e
        };

        file.write_all(json.as_bytes()).map_err(cleanup_and_err)?;
        file.sync_all().map_err(cleanup_and_err)?;
        fs::rename(&temp_path, &self.path).map_err(cleanup_and_err)?;
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }

        debug!(path = %self.path.display(), session = %session.id, status = %session.status, "Session saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<ClusterSession>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session: ClusterSession =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e))?;
        session.validate().map_err(|e| self.corrupt(e))?;
        if session.account != self.account {
            return Err(self.corrupt(format!(
                "record belongs to {}, expected {}",
                session.account, self.account
            )));
        }
        Ok(Some(session))
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Session cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn account(&self) -> &AccountContext {
        &self.account
    }
}

/// Flush the directory entry so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
