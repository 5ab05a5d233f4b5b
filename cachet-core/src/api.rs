//! Client-facing store API.
//!
//! Wraps the engine in a readers-writer lock and adds the display-layer
//! concerns: input trimming, secret hiding, session-expiry enforcement.
//! Every serviced operation first checks the session clock; an expired
//! session locks the store before the request is rejected.

use crate::crypto::{self, derive_user_key};
use crate::engine::{Engine, DEFAULT_TARBALLS_KEPT};
use crate::record::{Record, RecordForm};
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;
use tracing::info;

/// Minimum length of a history datetime argument (`YYYY-MM-DD HH:MM:SS`)
const DATETIME_LEN: usize = 19;

/// Thread-safe store handle for clients.
pub struct SecretStore {
    engine: RwLock<Engine>,
}

impl SecretStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: RwLock::new(Engine::new(snapshot_path.into(), backup_dir.into())),
        }
    }

    /// Set the session lifetime for subsequent operations.
    pub fn set_valid_term(&self, term: Duration) -> Result<()> {
        self.write()?.set_valid_term(term);
        Ok(())
    }

    pub fn snapshot_exists(&self) -> Result<bool> {
        Ok(self.read()?.snapshot_exists())
    }

    pub fn is_unlocked(&self) -> Result<bool> {
        Ok(self.read()?.is_unlocked())
    }

    /// Create a new store protected by `password`.
    pub fn create(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidInput("password must not be empty".to_string()));
        }
        self.write()?.init(derive_user_key(password))
    }

    /// Unlock an existing store, compacting outstanding fragments.
    /// Returns the pre-rebuild backup tarball path when one was made.
    pub fn unlock(&self, password: &str) -> Result<Option<PathBuf>> {
        self.write()?.rebuild(derive_user_key(password))
    }

    /// Lock the store, zeroizing keys and dropping records.
    pub fn lock(&self) -> Result<()> {
        self.write()?.reset();
        Ok(())
    }

    /// Add a new entry; returns its id.
    pub fn add(&self, form: &RecordForm) -> Result<String> {
        let form = trimmed(form);
        let record = Record::from_form(&form);
        let id = record.id.clone();
        self.session()?.add(record)?;
        info!(id, "entry added");
        Ok(id)
    }

    /// Apply an edit form to the entry it names.
    pub fn update(&self, form: &RecordForm) -> Result<()> {
        let form = trimmed(form);
        self.session()?.update(&form)
    }

    /// The full display form of one entry, history included.
    pub fn get(&self, id: &str) -> Result<RecordForm> {
        self.session()?.form_by_id(id)
    }

    /// All live entries, secrets hidden, most recently updated first.
    pub fn list_all(&self) -> Result<Vec<RecordForm>> {
        Ok(self.session()?.list_all())
    }

    /// The recycle bin, secrets hidden, most recently deleted first.
    pub fn list_deleted(&self) -> Result<Vec<RecordForm>> {
        Ok(self.session()?.list_deleted())
    }

    /// Exact, case-sensitive alias search.
    pub fn search_by_alias(&self, alias: &str) -> Result<Vec<RecordForm>> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(Error::InvalidInput(
                "search needs the complete alias; empty strings match nothing".to_string(),
            ));
        }
        Ok(self.session()?.forms_by_alias(alias))
    }

    /// Move an entry to the recycle bin.
    pub fn trash(&self, id: &str) -> Result<()> {
        let mut engine = self.session()?;
        if engine.form_by_id(id)?.is_deleted() {
            return Err(Error::InvalidInput(format!(
                "record {} is already in the recycle bin",
                id
            )));
        }
        engine.trash_by_id(id)
    }

    /// Restore an entry from the recycle bin. Returns the alias that was
    /// cleared when it now collides with a live entry.
    pub fn undelete(&self, id: &str) -> Result<Option<String>> {
        let mut engine = self.session()?;
        if !engine.form_by_id(id)?.is_deleted() {
            return Err(Error::NotFound(format!("{} is not in the recycle bin", id)));
        }
        engine.undelete_by_id(id)
    }

    /// Remove an entry for good. Only entries already in the recycle bin
    /// can be purged.
    pub fn delete_forever(&self, id: &str) -> Result<()> {
        let mut engine = self.session()?;
        if !engine.form_by_id(id)?.is_deleted() {
            return Err(Error::NotFound(format!("{} is not in the recycle bin", id)));
        }
        engine.delete_forever_by_id(id)
    }

    /// Remove one history entry of a record by its exact datetime.
    pub fn delete_history_item(&self, id: &str, datetime: &str) -> Result<()> {
        let datetime = datetime.trim();
        if datetime.len() < DATETIME_LEN {
            return Err(Error::InvalidInput(format!("malformed datetime: {}", datetime)));
        }
        self.session()?.delete_history_item(id, datetime)
    }

    /// A fresh random password, 16 base64url characters.
    pub fn generate_password(&self) -> String {
        crypto::generate_password()
    }

    /// Change the user password. The store is locked afterwards and must
    /// be unlocked with the new password.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(Error::InvalidInput("password must not be empty".to_string()));
        }
        let mut engine = self.session()?;
        if !engine.verify_user_key(old_password) {
            return Err(Error::BadUserKey);
        }
        engine.change_user_key(new_password)?;
        engine.reset();
        Ok(())
    }

    /// Persist an opaque settings blob (base64 JSON) in the sentinel.
    pub fn update_settings(&self, settings: &str) -> Result<()> {
        self.session()?.update_settings(settings)
    }

    /// The current settings blob from the sentinel's notes. Holds the
    /// init-time random filler until settings are first stored.
    pub fn settings(&self) -> Result<String> {
        Ok(self.session()?.settings().unwrap_or_default().to_string())
    }

    /// Delete old backup tarballs, keeping the newest ten.
    pub fn prune_backups(&self) -> Result<usize> {
        self.session()?.prune_tarballs(DEFAULT_TARBALLS_KEPT)
    }

    /// Acquire the engine for a serviced operation: the store must be
    /// unlocked and inside its session term; the term is then refreshed.
    fn session(&self) -> Result<RwLockWriteGuard<'_, Engine>> {
        let mut engine = self.write()?;
        if !engine.is_unlocked() {
            return Err(Error::StoreLocked);
        }
        if engine.is_expired() {
            engine.reset();
            return Err(Error::SessionExpired);
        }
        engine.touch();
        Ok(engine)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Engine>> {
        self.engine.write().map_err(|_| Error::LockPoisoned)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Engine>> {
        self.engine.read().map_err(|_| Error::LockPoisoned)
    }
}

fn trimmed(form: &RecordForm) -> RecordForm {
    let mut form = form.clone();
    form.id = form.id.trim().to_string();
    form.title = form.title.trim().to_string();
    form.alias = form.alias.trim().to_string();
    form.username = form.username.trim().to_string();
    form.notes = form.notes.trim().to_string();
    form
}
