use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::types::Session;

const SERVICE_NAME: &str = "burner-mail";
const ENTRY_KEY: &str = "session";
const SESSION_FILE: &str = "session.json";

/// Durable mirror of the signed-in session: keyring entry first, a
/// mode-0600 JSON file under the user data dir as fallback. Loading never
/// yields an expired or unparseable session; both cases clear storage.
/// When neither backend is available the store degrades to a no-op.
#[derive(Clone)]
pub struct SessionStore {
    keyring_key: Option<String>,
    file_path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            keyring_key: Some(ENTRY_KEY.to_string()),
            file_path: dirs::data_dir().map(|d| d.join("burner").join(SESSION_FILE)),
        }
    }

    /// File-only store at an explicit path. Used by tests and by callers
    /// that must avoid the OS keyring.
    pub fn with_file(path: PathBuf) -> Self {
        Self {
            keyring_key: None,
            file_path: Some(path),
        }
    }

    pub fn save(&self, session: &Session) -> AppResult<()> {
        let serialized = serde_json::to_string(session)
            .map_err(|e| AppError::Storage(format!("serializing session: {e}")))?;

        if let Some(key) = &self.keyring_key {
            match save_keyring(key, &serialized) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Keyring save failed ({e}); falling back to session file"),
            }
        }

        match &self.file_path {
            Some(path) => save_file(path, &serialized),
            None => {
                warn!("No session storage available; session will not survive restart");
                Ok(())
            }
        }
    }

    pub fn load(&self) -> Option<Session> {
        let raw = self.load_raw()?;

        let session: Session = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("Stored session unreadable ({e}); clearing");
                self.clear();
                return None;
            }
        };

        if !session.is_valid() {
            debug!(address = %session.account.address, "Stored session expired; clearing");
            self.clear();
            return None;
        }

        Some(session)
    }

    pub fn clear(&self) {
        if let Some(key) = &self.keyring_key {
            if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, key) {
                let _ = entry.delete_password();
            }
        }
        if let Some(path) = &self.file_path {
            let _ = fs::remove_file(path);
        }
    }

    fn load_raw(&self) -> Option<String> {
        if let Some(key) = &self.keyring_key {
            match load_keyring(key) {
                Ok(Some(raw)) => return Some(raw),
                Ok(None) => {}
                Err(e) => warn!("Keyring unavailable: {e}"),
            }
        }

        let path = self.file_path.as_ref()?;
        fs::read_to_string(path).ok()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load_keyring(key: &str) -> Result<Option<String>, String> {
    let entry =
        keyring::Entry::new(SERVICE_NAME, key).map_err(|e| format!("keyring entry error: {e}"))?;
    match entry.get_password() {
        Ok(raw) => Ok(Some(raw)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(format!("keyring read: {e}")),
    }
}

fn save_keyring(key: &str, serialized: &str) -> Result<(), String> {
    let entry =
        keyring::Entry::new(SERVICE_NAME, key).map_err(|e| format!("keyring entry error: {e}"))?;
    entry
        .set_password(serialized)
        .map_err(|e| format!("keyring write: {e}"))
}

fn save_file(path: &PathBuf, serialized: &str) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("creating session directory: {e}")))?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| AppError::Storage(format!("opening session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
    }

    file.write_all(serialized.as_bytes())
        .map_err(|e| AppError::Storage(format!("writing session file: {e}")))?;
    file.sync_all()
        .map_err(|e| AppError::Storage(format!("syncing session file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_ms, Account, Session};
    use chrono::Utc;

    fn account() -> Account {
        Account {
            id: "acc1".to_string(),
            address: "someone@a.test".to_string(),
            quota: 40_000_000,
            used: 0,
            is_disabled: false,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn roundtrips_valid_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::with_file(dir.path().join("session.json"));

        let session = Session::new("tok".to_string(), account());
        store.save(&session).unwrap();

        let loaded = store.load().expect("session should load");
        assert_eq!(loaded.token, "tok");
        assert_eq!(loaded.account.address, "someone@a.test");
    }

    #[test]
    fn expired_session_clears_and_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::with_file(path.clone());

        let mut session = Session::new("tok".to_string(), account());
        session.expires_at = now_ms() - 1;
        store.save(&session).unwrap();

        assert!(store.load().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_record_clears_and_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SessionStore::with_file(path.clone());

        assert!(store.load().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::with_file(dir.path().join("absent.json"));
        assert!(store.load().is_none());
    }
}
