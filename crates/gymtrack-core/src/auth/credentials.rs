use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use keyring::Entry;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{Credentials, User};

/// The two persisted slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    User,
    Auth,
}

impl Slot {
    pub fn key(self) -> &'static str {
        match self {
            Slot::User => "user",
            Slot::Auth => "auth",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access {slot} slot: {source}")]
    Io {
        slot: Slot,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {slot} slot: {source}")]
    Serde {
        slot: Slot,
        #[source]
        source: serde_json::Error,
    },

    #[error("Keychain error for {slot} slot: {source}")]
    Keychain {
        slot: Slot,
        #[source]
        source: keyring::Error,
    },
}

/// Raw key/value persistence behind the credential store.
///
/// A missing slot reads as `Ok(None)` and removing one is not an error.
/// `write` replaces the whole value.
pub trait SlotStore: Send + Sync {
    fn read(&self, slot: Slot) -> Result<Option<String>, StoreError>;
    fn write(&self, slot: Slot, value: &str) -> Result<(), StoreError>;
    fn remove(&self, slot: Slot) -> Result<(), StoreError>;
}

// ============================================================================
// File backend
// ============================================================================

/// One JSON file per slot in a directory.
pub struct FileSlotStore {
    dir: PathBuf,
}

impl FileSlotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.key()))
    }
}

impl SlotStore for FileSlotStore {
    fn read(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.slot_path(slot)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { slot, source }),
        }
    }

    fn write(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        let io = |source| StoreError::Io { slot, source };
        std::fs::create_dir_all(&self.dir).map_err(io)?;

        // Write beside the target and rename so readers never see a partial file
        let path = self.slot_path(slot);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)?;
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        match std::fs::remove_file(self.slot_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { slot, source }),
        }
    }
}

// ============================================================================
// Keychain backend
// ============================================================================

/// One OS keychain entry per slot.
pub struct KeyringSlotStore {
    service: String,
}

impl KeyringSlotStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, slot: Slot) -> Result<Entry, StoreError> {
        Entry::new(&self.service, slot.key()).map_err(|source| StoreError::Keychain { slot, source })
    }
}

impl SlotStore for KeyringSlotStore {
    fn read(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        match self.entry(slot)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(source) => Err(StoreError::Keychain { slot, source }),
        }
    }

    fn write(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.entry(slot)?
            .set_password(value)
            .map_err(|source| StoreError::Keychain { slot, source })
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        match self.entry(slot)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(source) => Err(StoreError::Keychain { slot, source }),
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local slots; nothing survives a restart.
#[derive(Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<Slot, String>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlotStore {
    fn read(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        Ok(self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slot)
            .cloned())
    }

    fn write(&self, slot: Slot, value: &str) -> Result<(), StoreError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, value.to_string());
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot);
        Ok(())
    }
}

// ============================================================================
// Typed store
// ============================================================================

/// Typed access to the `user` and `auth` slots.
///
/// The slots are independent; keeping them consistent is the session
/// manager's job.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SlotStore>,
}

impl CredentialStore {
    pub fn new(backend: impl SlotStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileSlotStore::new(dir))
    }

    pub fn keyring(service: impl Into<String>) -> Self {
        Self::new(KeyringSlotStore::new(service))
    }

    pub fn memory() -> Self {
        Self::new(MemorySlotStore::new())
    }

    fn load<T: DeserializeOwned>(&self, slot: Slot) -> Result<Option<T>, StoreError> {
        match self.backend.read(slot)? {
            Some(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|source| StoreError::Serde { slot, source }),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, slot: Slot, value: &T) -> Result<(), StoreError> {
        let contents =
            serde_json::to_string_pretty(value).map_err(|source| StoreError::Serde { slot, source })?;
        self.backend.write(slot, &contents)?;
        debug!(%slot, "Slot saved");
        Ok(())
    }

    fn remove(&self, slot: Slot) -> Result<(), StoreError> {
        self.backend.remove(slot)?;
        debug!(%slot, "Slot removed");
        Ok(())
    }

    // ===== User =====

    pub fn user(&self) -> Result<Option<User>, StoreError> {
        self.load(Slot::User)
    }

    pub fn save_user(&self, user: &User) -> Result<(), StoreError> {
        self.save(Slot::User, user)
    }

    pub fn remove_user(&self) -> Result<(), StoreError> {
        self.remove(Slot::User)
    }

    // ===== Credentials =====

    pub fn credentials(&self) -> Result<Option<Credentials>, StoreError> {
        self.load(Slot::Auth)
    }

    pub fn save_credentials(&self, credentials: &Credentials) -> Result<(), StoreError> {
        self.save(Slot::Auth, credentials)
    }

    pub fn remove_credentials(&self) -> Result<(), StoreError> {
        self.remove(Slot::Auth)
    }

    /// Remove both slots, attempting the second even if the first fails.
    /// Returns the first error.
    pub fn clear(&self) -> Result<(), StoreError> {
        let user = self.remove_user();
        let auth = self.remove_credentials();
        user.and(auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            name: "Ana".to_string(),
            email: "a@b.com".to_string(),
            avatar: None,
        }
    }

    #[test]
    fn test_missing_slots_read_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::file(dir.path().join("session"));
        assert_eq!(store.user().expect("readable"), None);
        assert_eq!(store.credentials().expect("readable"), None);
    }

    #[test]
    fn test_file_slots_persist_across_instances() {
        let dir = tempfile::tempdir().expect("temp dir");
        let creds = Credentials::new("t1", Some("r1".to_string()));

        let store = CredentialStore::file(dir.path());
        store.save_user(&user()).expect("user saved");
        store.save_credentials(&creds).expect("credentials saved");

        let reopened = CredentialStore::file(dir.path());
        assert_eq!(reopened.user().expect("readable"), Some(user()));
        assert_eq!(reopened.credentials().expect("readable"), Some(creds));
    }

    #[test]
    fn test_file_write_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let backend = FileSlotStore::new(dir.path());
        backend.write(Slot::User, "first").expect("write");
        backend.write(Slot::User, "second").expect("write");

        assert_eq!(backend.read(Slot::User).expect("read").as_deref(), Some("second"));
        assert!(!dir.path().join("user.json.tmp").exists());
        assert_eq!(backend.read(Slot::Auth).expect("read"), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = CredentialStore::file(dir.path());
        store.save_user(&user()).expect("user saved");

        store.clear().expect("first clear");
        store.clear().expect("second clear");
        assert_eq!(store.user().expect("readable"), None);
    }

    #[test]
    fn test_corrupt_slot_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("auth.json"), "{not json").expect("write");

        let store = CredentialStore::file(dir.path());
        let err = store.credentials().expect_err("corrupt slot");
        assert!(matches!(err, StoreError::Serde { slot: Slot::Auth, .. }));
    }

    #[test]
    fn test_slots_are_independent() {
        let store = CredentialStore::memory();
        store.save_user(&user()).expect("user saved");
        store
            .save_credentials(&Credentials::new("t1", None))
            .expect("credentials saved");

        store.remove_credentials().expect("removed");
        assert_eq!(store.user().expect("readable"), Some(user()));
        assert_eq!(store.credentials().expect("readable"), None);
    }

    #[test]
    fn test_clones_share_backend() {
        let store = CredentialStore::memory();
        let clone = store.clone();
        store.save_user(&user()).expect("user saved");
        assert_eq!(clone.user().expect("readable"), Some(user()));
    }
}
