//! Store engine: lifecycle, mutation log, compaction and key management.
//!
//! The engine owns the snapshot file and the fragment directory. Every
//! mutation takes effect in memory first and is then appended as a sealed
//! fragment file; `rebuild` replays outstanding fragments into a fresh
//! snapshot on unlock. The sentinel record at index 0 carries the master
//! key (sealed with the user key) and the settings blob.


use crate::archive;
use crate::crypto::{derive_user_key, generate_master_key, random_filler, SecretKey};
use crate::index::RecordIndex;
use crate::record::{Operation, Record, RecordForm};
use crate::storage::{self, now_nanos, TARBALL_EXT};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default session lifetime of an unlocked store
pub const DEFAULT_VALID_TERM: Duration = Duration::from_secs(30 * 60);

/// How many backup tarballs [`Engine::prune_tarballs`] keeps by default
pub const DEFAULT_TARBALLS_KEPT: usize = 10;

/// The encrypted append-log database engine.
pub struct Engine {
    user_key: Option<SecretKey>,
    master_key: Option<SecretKey>,
    records: RecordIndex,
    started_at: Instant,
    valid_term: Duration,
    snapshot_path: PathBuf,
    backup_dir: PathBuf,
}

impl Engine {
    /// Create an engine over the given snapshot file and backup/fragment
    /// directory. No data is loaded; call [`Engine::init`] or
    /// [`Engine::rebuild`].
    pub fn new(snapshot_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_key: None,
            master_key: None,
            records: RecordIndex::new(),
            started_at: Instant::now(),
            valid_term: DEFAULT_VALID_TERM,
            snapshot_path: snapshot_path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn snapshot_exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    /// Set the session lifetime.
    pub fn set_valid_term(&mut self, term: Duration) {
        self.valid_term = term;
    }

    /// Whether keys and records are resident in memory.
    pub fn is_unlocked(&self) -> bool {
        self.user_key.is_some() && self.master_key.is_some() && !self.records.is_empty()
    }

    /// Whether the session outlived its term.
    pub fn is_expired(&self) -> bool {
        self.started_at.elapsed() > self.valid_term
    }

    /// Restart the session clock.
    pub fn touch(&mut self) {
        self.started_at = Instant::now();
    }

    /// Zeroize keys and drop all records, locking the store.
    pub fn reset(&mut self) {
        self.user_key = None;
        self.master_key = None;
        self.records.clear();
        info!("store locked");
    }

    /// Create a new store.
    ///
    /// Generates a fresh master key, seals it into the sentinel record
    /// with `user_key`, and writes the one-line snapshot file. Fails with
    /// `AlreadyExists` if the snapshot file is present.
    pub fn init(&mut self, user_key: SecretKey) -> Result<()> {
        if self.snapshot_exists() {
            return Err(Error::AlreadyExists);
        }
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.backup_dir)?;

        let master_key = generate_master_key();
        let mut sentinel = Record::new("");
        sentinel.id = String::new();
        sentinel.password = STANDARD.encode(master_key.as_bytes());
        sentinel.notes = random_filler();

        let line = sentinel.seal(&user_key, None)?;
        storage::write_lines(&self.snapshot_path, &[line])?;

        self.records = RecordIndex::new();
        self.records.push(sentinel);
        self.user_key = Some(user_key);
        self.master_key = Some(master_key);
        self.touch();
        info!(path = %self.snapshot_path.display(), "store created");
        Ok(())
    }

    /// Load the snapshot, replay outstanding fragments and compact.
    ///
    /// Returns the path of the pre-rebuild backup tarball when fragments
    /// were replayed. A decryption failure on line 0 is `BadUserKey`; on
    /// any later line it is `InternalKeyError`. A replay failure aborts
    /// the rebuild and leaves the tarball on disk as evidence.
    pub fn rebuild(&mut self, user_key: SecretKey) -> Result<Option<PathBuf>> {
        if !self.records.is_empty() {
            return Err(Error::NotEmpty);
        }
        if !self.snapshot_exists() {
            return Err(Error::FileNotFound(self.snapshot_path.clone()));
        }

        self.scan_snapshot(user_key)?;

        fs::create_dir_all(&self.backup_dir)?;
        let frag_paths = storage::fragment_paths(&self.backup_dir)?;
        if frag_paths.is_empty() {
            self.touch();
            info!(records = self.records.len(), "store unlocked");
            return Ok(None);
        }

        let mut to_backup = frag_paths.clone();
        to_backup.push(self.snapshot_path.clone());
        let tarball = self.backup_to_tar(&to_backup)?;

        self.replay_fragments(&frag_paths)?;
        self.rewrite_snapshot()?;
        storage::delete_files(&frag_paths)?;

        self.touch();
        info!(
            records = self.records.len(),
            fragments = frag_paths.len(),
            "store unlocked and compacted"
        );
        Ok(Some(tarball))
    }

    /// Decrypt every snapshot line into the in-memory index, recovering
    /// the master key from the sentinel.
    fn scan_snapshot(&mut self, user_key: SecretKey) -> Result<()> {
        let lines = storage::read_lines(&self.snapshot_path)?;
        let (first, rest) = lines.split_first().ok_or(Error::EmptySnapshot)?;

        let sentinel = Record::decrypt(first, &user_key).map_err(|_| Error::BadUserKey)?;
        let key_bytes = STANDARD
            .decode(&sentinel.password)
            .map_err(|_| Error::InternalKeyError)?;
        let master_key =
            SecretKey::from_slice(&key_bytes).map_err(|_| Error::InternalKeyError)?;

        let mut records = RecordIndex::new();
        records.push(sentinel);
        for line in rest {
            let record =
                Record::decrypt(line, &master_key).map_err(|_| Error::InternalKeyError)?;
            records.push(record);
        }

        self.records = records;
        self.user_key = Some(user_key);
        self.master_key = Some(master_key);
        Ok(())
    }

    /// Replay fragment files, already sorted by filename.
    fn replay_fragments(&mut self, paths: &[PathBuf]) -> Result<()> {
        let master_key = self.master_key()?.clone();
        for path in paths {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            self.replay_one(path, &master_key)
                .map_err(|source| Error::FragmentReplay {
                    file,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    fn replay_one(&mut self, path: &Path, master_key: &SecretKey) -> Result<()> {
        let line = fs::read_to_string(path).map_err(|source| Error::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let frag = Record::decrypt_fragment(&line, master_key)?;

        let Some(operation) = frag.operation else {
            // Operation 0: already applied, nothing to replay.
            return Ok(());
        };

        match operation {
            Operation::Insert => self.records.push(frag.record),
            Operation::Update => {
                let i = self.records.position_by_id(&frag.record.id)?;
                let record = self.records.get_mut_by_id(&frag.record.id)?;
                if record.apply_fragment(&frag.record) {
                    self.records.move_to_tail(i);
                }
            }
            Operation::SoftDelete => {
                self.records.get_mut_by_id(&frag.record.id)?.soft_delete();
            }
            Operation::UnDelete => {
                let id = frag.record.id.clone();
                let alias = frag.record.alias.clone();
                let conflict = self.records.alias_in_use(&alias, &id);
                let record = self.records.get_mut_by_id(&id)?;
                record.alias = alias;
                record.undelete();
                if conflict {
                    // Keep aliases unique among live records.
                    record.alias.clear();
                }
            }
            Operation::DeleteForever => {
                self.records.remove_by_id(&frag.record.id)?;
            }
        }
        Ok(())
    }

    /// Seal the in-memory state back into the snapshot file.
    fn rewrite_snapshot(&self) -> Result<()> {
        let user_key = self.user_key()?;
        let master_key = self.master_key()?;
        let mut lines = Vec::with_capacity(self.records.len());
        for (i, record) in self.records.iter().enumerate() {
            let key = if i == 0 { user_key } else { master_key };
            lines.push(record.seal(key, None)?);
        }
        storage::write_lines(&self.snapshot_path, &lines)
    }

    /// Insert a new record and log an Insert fragment.
    pub fn add(&mut self, mut record: Record) -> Result<()> {
        record.title = record.title.trim().to_string();
        if record.title.is_empty() {
            return Err(Error::NeedTitle);
        }
        if self.records.alias_in_use(&record.alias, &record.id) {
            return Err(Error::AliasConflict(record.alias));
        }

        let line = record.seal(self.master_key()?, Some(Operation::Insert))?;
        self.records.push(record);
        self.write_fragment_line(&line)
    }

    /// Apply an edit form to the record it names and log an Update
    /// fragment when anything changed.
    pub fn update(&mut self, form: &RecordForm) -> Result<()> {
        if form.title.trim().is_empty() {
            return Err(Error::NeedTitle);
        }
        if self.records.alias_in_use(&form.alias, &form.id) {
            return Err(Error::AliasConflict(form.alias.clone()));
        }

        let i = self.records.position_by_id(&form.id)?;
        let effect = self.records.get_mut_by_id(&form.id)?.apply_form_update(form)?;
        if effect.index_changed {
            self.records.move_to_tail(i);
        }
        if effect.needs_fragment {
            self.write_fragment_for(&form.id, Operation::Update)?;
        }
        Ok(())
    }

    /// Soft-delete: the record stays in storage and is listable from the
    /// recycle bin.
    pub fn trash_by_id(&mut self, id: &str) -> Result<()> {
        self.records.get_mut_by_id(id)?.soft_delete();
        self.write_fragment_for(id, Operation::SoftDelete)
    }

    /// Restore a record from the recycle bin.
    ///
    /// When its alias now collides with a live record the alias is
    /// cleared; the cleared alias is returned so callers can tell the
    /// user.
    pub fn undelete_by_id(&mut self, id: &str) -> Result<Option<String>> {
        let alias = self.records.get_by_id(id)?.alias.clone();
        let conflict = self.records.alias_in_use(&alias, id);

        let record = self.records.get_mut_by_id(id)?;
        record.undelete();
        let cleared = if conflict {
            record.alias.clear();
            Some(alias)
        } else {
            None
        };
        if let Some(alias) = &cleared {
            warn!(id, alias = %alias, "alias conflicted with a live record and was cleared");
        }

        self.write_fragment_for(id, Operation::UnDelete)?;
        Ok(cleared)
    }

    /// Remove a record from memory for good and log a DeleteForever
    /// fragment. Not recoverable.
    pub fn delete_forever_by_id(&mut self, id: &str) -> Result<()> {
        let record = self.records.remove_by_id(id)?;
        let line = record.seal(self.master_key()?, Some(Operation::DeleteForever))?;
        self.write_fragment_line(&line)
    }

    /// Remove one history entry by its exact datetime.
    pub fn delete_history_item(&mut self, id: &str, datetime: &str) -> Result<()> {
        self.records.get_mut_by_id(id)?.delete_history(datetime)?;
        self.write_fragment_for(id, Operation::Update)
    }

    /// Re-derive the user key from `new_password` and rewrite the
    /// sentinel line. The master key is untouched, so all other snapshot
    /// lines stay valid. The snapshot is backed up to a tarball first.
    pub fn change_user_key(&mut self, new_password: &str) -> Result<()> {
        let new_key = derive_user_key(new_password);
        let mut boxes = storage::read_lines(&self.snapshot_path)?;
        self.backup_to_tar(&[self.snapshot_path.clone()])?;

        let first = boxes.first().ok_or(Error::EmptySnapshot)?;
        let mut sentinel = Record::decrypt(first, self.user_key()?).map_err(|_| Error::BadUserKey)?;
        sentinel.updated_at = now_nanos();
        boxes[0] = sentinel.seal(&new_key, None)?;
        storage::write_lines(&self.snapshot_path, &boxes)?;

        // Keep the new key resident: a second password change within the
        // same session must decrypt with it.
        self.user_key = Some(new_key);
        info!("user key changed");
        Ok(())
    }

    /// Whether `password` derives the resident user key.
    pub fn verify_user_key(&self, password: &str) -> bool {
        match &self.user_key {
            Some(key) => derive_user_key(password).ct_eq(key),
            None => false,
        }
    }

    /// Persist a new settings blob in the sentinel's notes, in memory and
    /// on disk. The snapshot is backed up to a tarball first.
    pub fn update_settings(&mut self, settings: &str) -> Result<()> {
        let mut boxes = storage::read_lines(&self.snapshot_path)?;
        self.backup_to_tar(&[self.snapshot_path.clone()])?;

        let first = boxes.first().ok_or(Error::EmptySnapshot)?;
        let mut sentinel = Record::decrypt(first, self.user_key()?).map_err(|_| Error::BadUserKey)?;
        sentinel.notes = settings.to_string();
        sentinel.updated_at = now_nanos();

        if let Some(resident) = self.records.sentinel_mut() {
            resident.notes = sentinel.notes.clone();
            resident.updated_at = sentinel.updated_at;
        }

        boxes[0] = sentinel.seal(self.user_key()?, None)?;
        storage::write_lines(&self.snapshot_path, &boxes)
    }

    /// The settings blob stored in the sentinel's notes.
    pub fn settings(&self) -> Option<&str> {
        self.records.sentinel().map(|s| s.notes.as_str())
    }

    pub fn has_settings(&self) -> bool {
        self.settings().is_some_and(|s| !s.is_empty())
    }

    /// All live records as display forms with secrets hidden, most
    /// recently updated first. The sentinel is never included.
    pub fn list_all(&self) -> Vec<RecordForm> {
        let mut all: Vec<RecordForm> = self
            .records
            .iter()
            .skip(1)
            .filter(|r| !r.is_deleted())
            .map(|r| r.to_form().hide_secrets())
            .collect();
        all.reverse();
        all
    }

    /// All soft-deleted records with secrets hidden, most recently
    /// deleted first.
    pub fn list_deleted(&self) -> Vec<RecordForm> {
        let mut deleted: Vec<(i64, RecordForm)> = self
            .records
            .iter()
            .skip(1)
            .filter(|r| r.is_deleted())
            .map(|r| (r.deleted_at, r.to_form().hide_secrets()))
            .collect();
        deleted.sort_by(|a, b| b.0.cmp(&a.0));
        deleted.into_iter().map(|(_, form)| form).collect()
    }

    /// Exact, case-sensitive alias search; secrets hidden.
    pub fn forms_by_alias(&self, alias: &str) -> Vec<RecordForm> {
        self.records
            .find_by_alias(alias)
            .into_iter()
            .map(|r| r.to_form().hide_secrets())
            .collect()
    }

    /// The full display form (history included) of one record.
    pub fn form_by_id(&self, id: &str) -> Result<RecordForm> {
        Ok(self.records.get_by_id(id)?.to_form())
    }

    /// Direct record access, used by tests and the dump comparison.
    pub fn records(&self) -> &RecordIndex {
        &self.records
    }

    /// Every record sealed with its proper key, newline-joined: the byte
    /// stream a cloud backup uploads.
    pub fn sealed_dump(&self) -> Result<Vec<u8>> {
        let user_key = self.user_key()?;
        let master_key = self.master_key()?;
        let mut buf = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            let key = if i == 0 { user_key } else { master_key };
            buf.extend_from_slice(record.seal(key, None)?.as_bytes());
            buf.push(b'\n');
        }
        Ok(buf)
    }

    /// Check a downloaded sealed stream against the in-memory state by
    /// per-record `updated_at`. Fails with `DumpMismatch` on the first
    /// divergence.
    pub fn matches_sealed_dump<R: BufRead>(&self, reader: R) -> Result<()> {
        let user_key = self.user_key()?;
        let master_key = self.master_key()?;
        let mut count = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let resident = self.records.get(count).ok_or(Error::DumpMismatch)?;
            let key = if count == 0 { user_key } else { master_key };
            let record = Record::decrypt(&line, key)?;
            if record.updated_at != resident.updated_at {
                return Err(Error::DumpMismatch);
            }
            count += 1;
        }
        if count != self.records.len() {
            return Err(Error::DumpMismatch);
        }
        Ok(())
    }

    /// Write a downloaded sealed stream to the snapshot file, verifying
    /// its line 0 against `password` and stamping the local `settings`
    /// blob into it so the next upload does not clobber the source.
    ///
    /// Works on a locked engine; the caller rebuilds afterwards.
    pub fn restore_sealed_dump<R: BufRead>(
        &self,
        reader: R,
        password: &str,
        settings: &str,
    ) -> Result<()> {
        let key = derive_user_key(password);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            if lines.is_empty() {
                let mut sentinel =
                    Record::decrypt(&line, &key).map_err(|_| Error::BadUserKey)?;
                sentinel.notes = settings.to_string();
                lines.push(sentinel.seal(&key, None)?);
            } else {
                lines.push(line);
            }
        }
        if lines.is_empty() {
            return Err(Error::EmptySnapshot);
        }
        storage::write_lines(&self.snapshot_path, &lines)
    }

    /// Backup tarballs in the backup directory, oldest first.
    pub fn tarball_paths(&self) -> Result<Vec<PathBuf>> {
        storage::tarball_paths(&self.backup_dir)
    }

    /// Delete all but the newest `keep` tarballs; returns how many were
    /// removed.
    pub fn prune_tarballs(&self, keep: usize) -> Result<usize> {
        let paths = self.tarball_paths()?;
        if paths.len() <= keep {
            return Ok(0);
        }
        let stale = &paths[..paths.len() - keep];
        storage::delete_files(stale)?;
        info!(removed = stale.len(), "pruned old backup tarballs");
        Ok(stale.len())
    }

    fn backup_to_tar(&self, files: &[PathBuf]) -> Result<PathBuf> {
        let path = self.backup_dir.join(storage::timestamp_filename(TARBALL_EXT));
        archive::pack(&path, files)?;
        Ok(path)
    }

    /// Seal the current state of the record `id` and append it as a
    /// fragment.
    fn write_fragment_for(&self, id: &str, operation: Operation) -> Result<()> {
        let record = self.records.get_by_id(id)?;
        let line = record.seal(self.master_key()?, Some(operation))?;
        self.write_fragment_line(&line)
    }

    fn write_fragment_line(&self, line: &str) -> Result<()> {
        storage::write_fragment(&self.backup_dir, line)?;
        Ok(())
    }

    fn user_key(&self) -> Result<&SecretKey> {
        self.user_key.as_ref().ok_or(Error::StoreLocked)
    }

    fn master_key(&self) -> Result<&SecretKey> {
        self.master_key.as_ref().ok_or(Error::StoreLocked)
    }
}
