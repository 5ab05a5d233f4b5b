//! In-memory ordered index of records.
//!
//! Position 0 is the sentinel; the rest are ordered by `updated_at`, most
//! recently updated last. Ties keep insertion order. Lookups scan from
//! position 1 so the sentinel is never reachable by id or alias.

use crate::record::Record;
use crate::{Error, Result};

/// Ordered record store with id and alias lookup.
#[derive(Debug, Default)]
pub struct RecordIndex {
    records: Vec<Record>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, i: usize) -> Option<&Record> {
        self.records.get(i)
    }

    /// The sentinel record, if the index is populated.
    pub fn sentinel(&self) -> Option<&Record> {
        self.records.first()
    }

    pub fn sentinel_mut(&mut self) -> Option<&mut Record> {
        self.records.first_mut()
    }

    /// Append at the tail. New and freshly-updated records always carry
    /// the newest `updated_at`, so the order invariant holds.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Position of the record with `id`, scanning from position 1.
    pub fn position_by_id(&self, id: &str) -> Result<usize> {
        self.records
            .iter()
            .skip(1)
            .position(|r| r.id == id)
            .map(|i| i + 1)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> Result<&Record> {
        let i = self.position_by_id(id)?;
        Ok(&self.records[i])
    }

    pub fn get_mut_by_id(&mut self, id: &str) -> Result<&mut Record> {
        let i = self.position_by_id(id)?;
        Ok(&mut self.records[i])
    }

    /// All non-deleted records carrying `alias`, skipping the sentinel.
    /// Several records may share an alias only while all but one of them
    /// sit in the recycle bin.
    pub fn find_by_alias(&self, alias: &str) -> Vec<&Record> {
        if alias.is_empty() {
            return Vec::new();
        }
        self.records
            .iter()
            .skip(1)
            .filter(|r| !r.is_deleted() && r.alias == alias)
            .collect()
    }

    /// Whether a non-deleted record other than `excluding_id` already
    /// holds `alias`.
    pub fn alias_in_use(&self, alias: &str, excluding_id: &str) -> bool {
        if alias.is_empty() {
            return false;
        }
        self.records
            .iter()
            .skip(1)
            .any(|r| !r.is_deleted() && r.id != excluding_id && r.alias == alias)
    }

    /// Move the record at `i` to the tail after its `updated_at` moved.
    pub fn move_to_tail(&mut self, i: usize) {
        let record = self.records.remove(i);
        self.records.push(record);
    }

    /// Remove and return the record with `id`.
    pub fn remove_by_id(&mut self, id: &str) -> Result<Record> {
        let i = self.position_by_id(id)?;
        Ok(self.records.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> Record {
        let mut r = Record::new(title);
        r.id = id.to_string();
        r
    }

    fn index_with_sentinel() -> RecordIndex {
        let mut index = RecordIndex::new();
        let mut sentinel = Record::new("");
        sentinel.id = String::new();
        index.push(sentinel);
        index
    }

    #[test]
    fn test_lookup_skips_sentinel() {
        let index = index_with_sentinel();
        // The sentinel's empty id must not be found by id lookup.
        assert!(matches!(index.position_by_id(""), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_get_by_id() {
        let mut index = index_with_sentinel();
        index.push(record("a1", "One"));
        index.push(record("b2", "Two"));

        assert_eq!(index.position_by_id("b2").unwrap(), 2);
        assert_eq!(index.get_by_id("a1").unwrap().title, "One");
        assert!(index.get_by_id("zzz").is_err());
    }

    #[test]
    fn test_alias_lookup_skips_deleted() {
        let mut index = index_with_sentinel();
        let mut r1 = record("a1", "One");
        r1.alias = "mail".to_string();
        r1.soft_delete();
        let mut r2 = record("b2", "Two");
        r2.alias = "mail".to_string();
        index.push(r1);
        index.push(r2);

        let found = index.find_by_alias("mail");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b2");
        assert!(index.find_by_alias("").is_empty());
    }

    #[test]
    fn test_alias_in_use() {
        let mut index = index_with_sentinel();
        let mut r1 = record("a1", "One");
        r1.alias = "mail".to_string();
        index.push(r1);

        assert!(index.alias_in_use("mail", "b2"));
        assert!(!index.alias_in_use("mail", "a1"));
        assert!(!index.alias_in_use("", "b2"));
    }

    #[test]
    fn test_move_to_tail() {
        let mut index = index_with_sentinel();
        index.push(record("a1", "One"));
        index.push(record("b2", "Two"));

        index.move_to_tail(1);
        assert_eq!(index.get(1).unwrap().id, "b2");
        assert_eq!(index.get(2).unwrap().id, "a1");
    }

    #[test]
    fn test_remove_by_id() {
        let mut index = index_with_sentinel();
        index.push(record("a1", "One"));

        let removed = index.remove_by_id("a1").unwrap();
        assert_eq!(removed.id, "a1");
        assert_eq!(index.len(), 1);
        assert!(index.remove_by_id("a1").is_err());
    }
}
