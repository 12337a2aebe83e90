//! Persistent session identity.
//!
//! Every kiosk installation identifies itself to the reader registry with a
//! [`SessionId`] that survives restarts, so a reservation left behind by a
//! crashed kiosk can be recognized (and released) by the same installation
//! when it comes back. The id is stored as a single line of text.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{Result, SessionId, error::Error};

/// File-backed store for the installation's session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored id, if the file exists.
    ///
    /// # Errors
    /// Returns `Error::SessionStore` if the file exists but cannot be read or
    /// does not hold a valid session id.
    pub fn load(&self) -> Result<Option<SessionId>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => SessionId::new(contents.trim())
                .map(Some)
                .map_err(|e| self.store_error(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.store_error(e.to_string())),
        }
    }

    /// Return the stored id, generating and persisting a new one on first use.
    ///
    /// # Errors
    /// Returns `Error::SessionStore` if the existing file is unreadable or
    /// corrupt, or if a new id cannot be written.
    pub fn load_or_create(&self) -> Result<SessionId> {
        if let Some(id) = self.load()? {
            return Ok(id);
        }

        let id = SessionId::generate();
        self.save(&id)?;
        Ok(id)
    }

    /// Persist `id`, replacing any previous value.
    ///
    /// The id is written to a sibling temp file and renamed into place so a
    /// crash mid-write never leaves a truncated id behind.
    ///
    /// # Errors
    /// Returns `Error::SessionStore` on any filesystem failure.
    pub fn save(&self, id: &SessionId) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.store_error(e.to_string()))?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{id}\n")).map_err(|e| self.store_error(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.store_error(e.to_string()))?;
        Ok(())
    }

    fn store_error(&self, message: String) -> Error {
        Error::SessionStore {
            path: self.path.display().to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session"));

        let first = store.load_or_create().unwrap();
        let second = store.load_or_create().unwrap();
        assert_eq!(first, second);

        let reopened = SessionStore::new(store.path().to_path_buf());
        assert_eq!(reopened.load().unwrap(), Some(first));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        fs::write(&path, "not a valid id\n").unwrap();

        let store = SessionStore::new(path);
        assert!(matches!(
            store.load_or_create(),
            Err(Error::SessionStore { .. })
        ));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session"));

        store.load_or_create().unwrap();
        let replacement = SessionId::new("kiosk-lobby").unwrap();
        store.save(&replacement).unwrap();

        assert_eq!(store.load().unwrap(), Some(replacement));
    }
}
