//! Record model: the secret entry, its history, and its sealed form.
//!
//! In-memory records carry no operation tag; only decoded fragments do.
//! Both share one JSON wire schema (camelCase field names, stable across
//! versions) so a snapshot line and a fragment line decode the same way.

use crate::crypto::{self, new_nonce, Nonce, SecretKey};
use crate::storage::now_nanos;
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::DateTime;
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

/// Mutation kind carried by a fragment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    SoftDelete,
    UnDelete,
    DeleteForever,
}

impl Operation {
    /// Wire code, 1 through 5.
    pub fn code(self) -> u8 {
        match self {
            Operation::Insert => 1,
            Operation::Update => 2,
            Operation::SoftDelete => 3,
            Operation::UnDelete => 4,
            Operation::DeleteForever => 5,
        }
    }

    /// Decode a wire code. Zero means "no operation" (snapshot records).
    pub fn from_code(code: u8) -> Result<Option<Operation>> {
        Ok(match code {
            0 => None,
            1 => Some(Operation::Insert),
            2 => Some(Operation::Update),
            3 => Some(Operation::SoftDelete),
            4 => Some(Operation::UnDelete),
            5 => Some(Operation::DeleteForever),
            other => return Err(Error::UnknownOperation(other)),
        })
    }
}

/// One snapshot of a record's content before an edit, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub title: String,
    pub username: String,
    pub password: String,
    pub notes: String,
    /// `YYYY-MM-DD HH:MM:SS`; unique within one record's history.
    pub date_time: String,
}

/// The shared JSON schema for snapshot lines and fragment lines.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPayload {
    id: String,
    title: String,
    alias: String,
    nonce: Nonce,
    username: String,
    password: String,
    notes: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: i64,
    operation: u8,
    history: Vec<HistoryEntry>,
}

/// A single secret entry.
///
/// The record at index 0 of the store is the sentinel: its id is the
/// empty string, its password field holds the base64-encoded master key
/// and its notes hold the settings blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub alias: String,
    pub nonce: Nonce,
    pub username: String,
    pub password: String,
    pub notes: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: i64,
    pub history: Vec<HistoryEntry>,
}

/// A decoded fragment: one record state plus the operation to replay.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub operation: Option<Operation>,
    pub record: Record,
}

/// What a form update did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEffect {
    /// The record's `updated_at` moved, so it belongs at the index tail.
    pub index_changed: bool,
    /// Something changed; a fragment must be written.
    pub needs_fragment: bool,
}

/// Generate a record id: wall-clock seconds times 10^8 plus an 8-digit
/// random number, rendered in base 36. Collisions require two ids in the
/// same second to draw the same random number.
pub fn new_record_id() -> String {
    const SPAN: i64 = 100_000_000;
    let n: i64 = OsRng.gen_range(0..SPAN);
    let seconds = crate::storage::now_seconds();
    to_base36(seconds * SPAN + n)
}

fn to_base36(mut n: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Format a nanosecond timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_datetime(nanos: i64) -> String {
    let dt = DateTime::from_timestamp(
        nanos.div_euclid(1_000_000_000),
        nanos.rem_euclid(1_000_000_000) as u32,
    )
    .unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Record {
    /// Create a record with a fresh id, a fresh nonce and now() timestamps.
    pub fn new(title: &str) -> Record {
        let now = now_nanos();
        Record {
            id: new_record_id(),
            title: title.to_string(),
            alias: String::new(),
            nonce: new_nonce(),
            username: String::new(),
            password: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: 0,
            history: Vec::new(),
        }
    }

    /// Create a record from a submitted form.
    pub fn from_form(form: &RecordForm) -> Record {
        let mut record = Record::new(&form.title);
        record.username = form.username.clone();
        record.password = form.password.clone();
        record.notes = form.notes.clone();
        record
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at > 0
    }

    /// Mark as soft-deleted.
    pub fn soft_delete(&mut self) {
        self.deleted_at = now_nanos();
    }

    /// Clear the soft-delete mark.
    pub fn undelete(&mut self) {
        self.deleted_at = 0;
    }

    /// Serialize to JSON, encrypt with `key` and this record's own nonce,
    /// and return the base64 line. `operation` is `None` for snapshot
    /// lines and the mutation kind for fragment lines.
    pub fn seal(&self, key: &SecretKey, operation: Option<Operation>) -> Result<String> {
        let payload = RecordPayload {
            id: self.id.clone(),
            title: self.title.clone(),
            alias: self.alias.clone(),
            nonce: self.nonce,
            username: self.username.clone(),
            password: self.password.clone(),
            notes: self.notes.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            operation: operation.map_or(0, Operation::code),
            history: self.history.clone(),
        };
        let json = serde_json::to_vec(&payload)?;
        let blob = crypto::seal(&json, key, &self.nonce)?;
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a snapshot line. The operation tag on the wire is ignored;
    /// in-memory records never carry one.
    pub fn decrypt(box64: &str, key: &SecretKey) -> Result<Record> {
        Ok(decode_payload(box64, key)?.1)
    }

    /// Decrypt a fragment line, keeping its operation tag.
    pub fn decrypt_fragment(box64: &str, key: &SecretKey) -> Result<Fragment> {
        let (code, record) = decode_payload(box64, key)?;
        Ok(Fragment {
            operation: Operation::from_code(code)?,
            record,
        })
    }

    /// Apply an edit form.
    ///
    /// An alias-only change updates the alias in place without touching
    /// the history or `updated_at`. Any content change prepends a history
    /// snapshot of the previous values and moves `updated_at` to now.
    pub fn apply_form_update(&mut self, form: &RecordForm) -> Result<UpdateEffect> {
        let mut needs_fragment = false;
        if self.alias != form.alias {
            self.alias = form.alias.clone();
            needs_fragment = true;
        }
        if self.content_equals(form) {
            return Ok(UpdateEffect {
                index_changed: false,
                needs_fragment,
            });
        }

        let updated_at = now_nanos();
        self.push_history(updated_at)?;
        self.title = form.title.clone();
        self.username = form.username.clone();
        self.password = form.password.clone();
        self.notes = form.notes.clone();
        self.updated_at = updated_at;

        Ok(UpdateEffect {
            index_changed: true,
            needs_fragment: true,
        })
    }

    fn content_equals(&self, form: &RecordForm) -> bool {
        self.title == form.title
            && self.username == form.username
            && self.password == form.password
            && self.notes == form.notes
    }

    fn push_history(&mut self, updated_at: i64) -> Result<()> {
        let date_time = format_datetime(updated_at);
        if self.history.iter().any(|h| h.date_time == date_time) {
            return Err(Error::DuplicateHistoryDatetime(date_time));
        }
        self.history.insert(
            0,
            HistoryEntry {
                title: self.title.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                notes: self.notes.clone(),
                date_time,
            },
        );
        Ok(())
    }

    /// Merge a replayed fragment into this record.
    ///
    /// Alias and history are authoritative in the fragment and always
    /// overwritten (they can change without `updated_at` moving). The
    /// remaining fields are taken only when `updated_at` differs; returns
    /// whether the record must move to the index tail.
    pub fn apply_fragment(&mut self, frag: &Record) -> bool {
        self.alias = frag.alias.clone();
        self.history = frag.history.clone();

        if self.updated_at == frag.updated_at {
            return false;
        }
        self.title = frag.title.clone();
        self.username = frag.username.clone();
        self.password = frag.password.clone();
        self.notes = frag.notes.clone();
        self.updated_at = frag.updated_at;
        true
    }

    /// Remove the history entry with the exact datetime.
    pub fn delete_history(&mut self, datetime: &str) -> Result<()> {
        let i = self
            .history
            .iter()
            .position(|h| h.date_time == datetime)
            .ok_or_else(|| Error::HistoryNotFound(datetime.to_string()))?;
        self.history.remove(i);
        Ok(())
    }

    /// Display-layer projection with formatted timestamps.
    pub fn to_form(&self) -> RecordForm {
        RecordForm {
            id: self.id.clone(),
            title: self.title.clone(),
            alias: self.alias.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            notes: self.notes.clone(),
            created_at: format_nonzero(self.created_at),
            updated_at: format_nonzero(self.updated_at),
            deleted_at: format_nonzero(self.deleted_at),
            history: self.history.clone(),
        }
    }
}

fn decode_payload(box64: &str, key: &SecretKey) -> Result<(u8, Record)> {
    let blob = STANDARD
        .decode(box64.trim())
        .map_err(|_| crate::CryptoError::DecryptionFailed)?;
    let json = crypto::open(&blob, key)?;
    let payload: RecordPayload = serde_json::from_slice(&json)?;
    let record = Record {
        id: payload.id,
        title: payload.title,
        alias: payload.alias,
        nonce: payload.nonce,
        username: payload.username,
        password: payload.password,
        notes: payload.notes,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        deleted_at: payload.deleted_at,
        history: payload.history,
    };
    Ok((payload.operation, record))
}

fn format_nonzero(nanos: i64) -> String {
    if nanos > 0 {
        format_datetime(nanos)
    } else {
        String::new()
    }
}

/// What the display layer sees: formatted timestamps, plain strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordForm {
    pub id: String,
    pub title: String,
    pub alias: String,
    pub username: String,
    pub password: String,
    pub notes: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: String,
    pub history: Vec<HistoryEntry>,
}

impl RecordForm {
    pub fn is_deleted(&self) -> bool {
        !self.deleted_at.is_empty()
    }

    /// Mask the password and drop notes and history, for listings that
    /// must not expose secrets.
    pub fn hide_secrets(mut self) -> RecordForm {
        if !self.password.is_empty() {
            self.password = "******".to_string();
        }
        self.notes = String::new();
        self.history = Vec::new();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_master_key;

    fn form(title: &str, username: &str, password: &str, notes: &str) -> RecordForm {
        RecordForm {
            title: title.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            notes: notes.to_string(),
            ..RecordForm::default()
        }
    }

    #[test]
    fn test_new_record_id_shape() {
        let id = new_record_id();
        assert!((11..=13).contains(&id.len()), "unexpected id: {}", id);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<String> = (0..1000).map(|_| new_record_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_seal_decrypt_roundtrip() {
        let key = generate_master_key();
        let mut record = Record::new("Gmail");
        record.username = "alice".to_string();
        record.password = "hunter2".to_string();
        record.notes = "personal".to_string();

        let box64 = record.seal(&key, None).unwrap();
        let decrypted = Record::decrypt(&box64, &key).unwrap();
        assert_eq!(record, decrypted);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let record = Record::new("Gmail");
        let box64 = record.seal(&generate_master_key(), None).unwrap();

        let err = Record::decrypt(&box64, &generate_master_key()).unwrap_err();
        assert!(matches!(
            err,
            Error::Crypto(crate::CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_fragment_keeps_operation() {
        let key = generate_master_key();
        let record = Record::new("Gmail");

        let box64 = record.seal(&key, Some(Operation::SoftDelete)).unwrap();
        let frag = Record::decrypt_fragment(&box64, &key).unwrap();
        assert_eq!(frag.operation, Some(Operation::SoftDelete));

        let box64 = record.seal(&key, None).unwrap();
        let frag = Record::decrypt_fragment(&box64, &key).unwrap();
        assert_eq!(frag.operation, None);
    }

    #[test]
    fn test_wire_field_names() {
        let key = generate_master_key();
        let record = Record::new("Gmail");
        let box64 = record.seal(&key, Some(Operation::Insert)).unwrap();

        let blob = STANDARD.decode(box64).unwrap();
        let json = crate::crypto::open(&blob, &key).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        for field in [
            "id", "title", "alias", "nonce", "username", "password", "notes", "createdAt",
            "updatedAt", "deletedAt", "operation", "history",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["operation"], 1);
        assert_eq!(value["nonce"].as_array().unwrap().len(), 24);
    }

    #[test]
    fn test_alias_only_update() {
        let mut record = Record::new("Gmail");
        let updated_at = record.updated_at;

        let mut f = form("Gmail", "", "", "");
        f.alias = "gm".to_string();
        let effect = record.apply_form_update(&f).unwrap();

        assert!(!effect.index_changed);
        assert!(effect.needs_fragment);
        assert_eq!(record.alias, "gm");
        assert_eq!(record.updated_at, updated_at);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_content_update_writes_history() {
        let mut record = Record::new("Gmail");
        record.username = "alice".to_string();
        record.password = "x".to_string();

        let effect = record
            .apply_form_update(&form("Gmail", "alice", "y", ""))
            .unwrap();

        assert!(effect.index_changed);
        assert!(effect.needs_fragment);
        assert_eq!(record.password, "y");
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].password, "x");
    }

    #[test]
    fn test_noop_update() {
        let mut record = Record::new("Gmail");
        record.username = "alice".to_string();

        let effect = record
            .apply_form_update(&form("Gmail", "alice", "", ""))
            .unwrap();
        assert!(!effect.index_changed);
        assert!(!effect.needs_fragment);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_duplicate_history_datetime_rejected() {
        let mut record = Record::new("Gmail");
        record.password = "one".to_string();
        record
            .apply_form_update(&form("Gmail", "", "two", ""))
            .unwrap();

        // A second content edit within the same second collides on the
        // formatted datetime.
        let err = record
            .apply_form_update(&form("Gmail", "", "three", ""))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHistoryDatetime(_)));
    }

    #[test]
    fn test_apply_fragment_same_updated_at() {
        let mut record = Record::new("Gmail");
        record.password = "secret".to_string();

        let mut frag = record.clone();
        frag.alias = "gm".to_string();
        frag.password = "ignored".to_string();

        assert!(!record.apply_fragment(&frag));
        assert_eq!(record.alias, "gm");
        assert_eq!(record.password, "secret");
    }

    #[test]
    fn test_apply_fragment_newer_updated_at() {
        let mut record = Record::new("Gmail");
        let mut frag = record.clone();
        frag.password = "rotated".to_string();
        frag.updated_at += 1;

        assert!(record.apply_fragment(&frag));
        assert_eq!(record.password, "rotated");
        assert_eq!(record.updated_at, frag.updated_at);
    }

    #[test]
    fn test_delete_history() {
        let mut record = Record::new("Gmail");
        record.password = "a".to_string();
        record.apply_form_update(&form("Gmail", "", "b", "")).unwrap();
        let datetime = record.history[0].date_time.clone();

        record.delete_history(&datetime).unwrap();
        assert!(record.history.is_empty());

        assert!(matches!(
            record.delete_history(&datetime),
            Err(Error::HistoryNotFound(_))
        ));
    }

    #[test]
    fn test_hide_secrets() {
        let mut record = Record::new("Gmail");
        record.password = "secret".to_string();
        record.notes = "note".to_string();
        record.apply_form_update(&form("Gmail", "", "new", "")).unwrap();

        let hidden = record.to_form().hide_secrets();
        assert_eq!(hidden.password, "******");
        assert!(hidden.notes.is_empty());
        assert!(hidden.history.is_empty());
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(format_datetime(0), "1970-01-01 00:00:00");
        assert_eq!(format_datetime(1_600_000_000_000_000_000), "2020-09-13 12:26:40");
    }
}
