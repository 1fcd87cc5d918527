//! Sled-backed implementation of the ordered store contract
//!
//! Sled already is an embedded byte-ordered store with cheap concurrent
//! readers, so `put`/`get`/`delete` map straight onto the default tree.
//! The cursor is implemented as bounded sub-range lookups around the
//! current position instead of a long-lived native iterator, which keeps
//! `seek`/`next`/`prev` correct in the face of concurrent deletes: every
//! step re-reads the tree, so a deleted neighbor is simply skipped.

use std::ops::Bound;
use std::path::Path;

use tracing::error;

use super::{Range, Store, StoreError, StoreIterator};

/// Ordered store backed by an embedded sled database.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .path(path)
            .open()
            .map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self { db })
    }
}

impl Store for SledStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(key)
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StoreError::Read(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| StoreError::Write(e.to_string()))
    }

    fn new_iterator(&self, range: Option<Range>) -> Box<dyn StoreIterator> {
        Box::new(SledIterator {
            db: self.db.clone(),
            range,
            pos: Pos::BeforeFirst,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Flush(e.to_string()))
    }
}

/// Cursor position: off either end, or parked on an entry.
#[derive(Debug)]
enum Pos {
    BeforeFirst,
    At(Vec<u8>, Vec<u8>),
    AfterLast,
}

struct SledIterator {
    db: sled::Db,
    range: Option<Range>,
    pos: Pos,
}

impl SledIterator {
    fn in_range(&self, key: &[u8]) -> bool {
        match &self.range {
            None => true,
            Some(r) => key >= r.start.as_slice() && key < r.limit.as_slice(),
        }
    }

    fn first_at_or_after(&self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let from = match &self.range {
            Some(r) if key < r.start.as_slice() => r.start.clone(),
            _ => key.to_vec(),
        };
        self.step(self.db.range(from..).next())
    }

    fn first_after(&self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let bounds = (Bound::Excluded(key.to_vec()), Bound::Unbounded);
        self.step(self.db.range::<Vec<u8>, _>(bounds).next())
    }

    fn first(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.range {
            Some(r) => self.first_at_or_after(&r.start.clone()),
            None => self.step(self.db.iter().next()),
        }
    }

    fn last_before(&self, key: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let upper = match &self.range {
            Some(r) if key > r.limit.as_slice() => r.limit.clone(),
            _ => key.to_vec(),
        };
        self.step(self.db.range(..upper).next_back())
    }

    fn last(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match &self.range {
            Some(r) => self.last_before(&r.limit.clone()),
            None => self.step(self.db.iter().next_back()),
        }
    }

    /// Unwrap one sled step, dropping out-of-range hits and downgrading
    /// storage faults to end-of-iteration after logging them.
    fn step(
        &self,
        entry: Option<Result<(sled::IVec, sled::IVec), sled::Error>>,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        match entry {
            Some(Ok((k, v))) if self.in_range(&k) => Some((k.to_vec(), v.to_vec())),
            Some(Ok(_)) => None,
            Some(Err(e)) => {
                error!(error = %e, "sled iterator step failed");
                None
            }
            None => None,
        }
    }
}

impl StoreIterator for SledIterator {
    fn seek(&mut self, key: &[u8]) {
        self.pos = match self.first_at_or_after(key) {
            Some((k, v)) => Pos::At(k, v),
            None => Pos::AfterLast,
        };
    }

    fn next(&mut self) -> bool {
        let entry = match &self.pos {
            Pos::BeforeFirst => self.first(),
            Pos::At(k, _) => self.first_after(&k.clone()),
            Pos::AfterLast => None,
        };
        match entry {
            Some((k, v)) => {
                self.pos = Pos::At(k, v);
                true
            }
            None => {
                self.pos = Pos::AfterLast;
                false
            }
        }
    }

    fn prev(&mut self) -> bool {
        let entry = match &self.pos {
            Pos::BeforeFirst => None,
            Pos::At(k, _) => self.last_before(&k.clone()),
            Pos::AfterLast => self.last(),
        };
        match entry {
            Some((k, v)) => {
                self.pos = Pos::At(k, v);
                true
            }
            None => {
                self.pos = Pos::BeforeFirst;
                false
            }
        }
    }

    fn valid(&self) -> bool {
        matches!(self.pos, Pos::At(_, _))
    }

    fn key(&self) -> &[u8] {
        match &self.pos {
            Pos::At(k, _) => k,
            _ => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.pos {
            Pos::At(_, v) => v,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    fn seed(store: &SledStore, keys: &[&[u8]]) {
        for key in keys {
            store.put(key, b"v").unwrap();
        }
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, store) = open_store();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        // Deleting again is fine.
        store.delete(b"a").unwrap();
    }

    #[test]
    fn test_iterator_ascending_scan() {
        let (_dir, store) = open_store();
        seed(&store, &[b"c", b"a", b"b"]);
        let mut iter = store.new_iterator(None);
        let mut seen = Vec::new();
        while iter.next() {
            seen.push(iter.key().to_vec());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_seek_lands_at_or_after() {
        let (_dir, store) = open_store();
        seed(&store, &[b"a", b"c", b"e"]);
        let mut iter = store.new_iterator(None);
        iter.seek(b"b");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");
        iter.seek(b"c");
        assert_eq!(iter.key(), b"c");
        iter.seek(b"f");
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_prev_steps_back() {
        let (_dir, store) = open_store();
        seed(&store, &[b"a", b"c", b"e"]);
        let mut iter = store.new_iterator(None);
        iter.seek(b"c");
        assert!(iter.prev());
        assert_eq!(iter.key(), b"a");
        assert!(!iter.prev());
        assert!(!iter.valid());
        // Stepping forward from before-first finds the first entry.
        assert!(iter.next());
        assert_eq!(iter.key(), b"a");
    }

    #[test]
    fn test_iterator_prev_from_end() {
        let (_dir, store) = open_store();
        seed(&store, &[b"a", b"c"]);
        let mut iter = store.new_iterator(None);
        iter.seek(b"z");
        assert!(!iter.valid());
        assert!(iter.prev());
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn test_iterator_survives_concurrent_delete() {
        let (_dir, store) = open_store();
        seed(&store, &[b"a", b"b", b"c"]);
        let mut iter = store.new_iterator(None);
        iter.seek(b"a");
        store.delete(b"b").unwrap();
        assert!(iter.next());
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn test_iterator_range_bounds() {
        let (_dir, store) = open_store();
        seed(&store, &[b"a", b"b", b"c", b"d"]);
        let mut iter = store.new_iterator(Some(Range {
            start: b"b".to_vec(),
            limit: b"d".to_vec(),
        }));
        iter.seek(b"a");
        assert_eq!(iter.key(), b"b");
        assert!(iter.next());
        assert_eq!(iter.key(), b"c");
        assert!(!iter.next());
        assert!(iter.prev());
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SledStore::open(&path).unwrap();
            store.put(b"k", b"v").unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
