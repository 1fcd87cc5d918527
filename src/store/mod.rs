//! Ordered key-value store abstraction
//!
//! The engine persists everything through this one seam: queue records
//! and both queue lines are rows in a single byte-ordered keyspace, and
//! every semantic ordering (FIFO wait, earliest-due schedule) is encoded
//! into the keys so a plain ascending scan yields it. The trait mirrors
//! what a log-structured ordered store offers: point writes, deletes,
//! and bidirectional cursors over the ascending key order, safe to use
//! concurrently with writers.

use thiserror::Error;

pub mod sled;

pub use self::sled::SledStore;

/// Key separator between keyspace segments.
pub const KEY_SEP: u8 = 0x00;

/// End-of-range sentinel; sorts after every separator-delimited segment.
pub const KEY_TERM: u8 = 0xff;

/// Keyspace prefix for persisted queue records.
pub const QUEUE_RECORD_TAG: u8 = b'm';

/// Keyspace prefix for task entries of all queue lines.
pub const QUEUE_LINE_TAG: u8 = b'q';

/// Line tag for the ready-to-run wait line.
pub const WAIT_LINE_TAG: u8 = b'w';

/// Line tag for the future-due schedule line.
pub const SCHEDULE_LINE_TAG: u8 = b's';

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store open failed: {0}")]
    Open(String),
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
    #[error("store flush failed: {0}")]
    Flush(String),
}

/// Optional key bounds for an iterator: `start` inclusive, `limit`
/// exclusive.
#[derive(Debug, Clone)]
pub struct Range {
    pub start: Vec<u8>,
    pub limit: Vec<u8>,
}

/// The persistence contract the dispatch engine depends on.
pub trait Store: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Open a cursor over the ascending key order, optionally bounded.
    /// Concurrent iterators and writers are permitted; an iterator
    /// observes its own point-in-time view of each step.
    fn new_iterator(&self, range: Option<Range>) -> Box<dyn StoreIterator>;

    /// Force buffered writes to durable storage.
    fn flush(&self) -> Result<(), StoreError>;

    /// Flush and release the store. The default implementation flushes;
    /// backends that hold OS resources release them on drop.
    fn close(&self) -> Result<(), StoreError> {
        self.flush()
    }
}

/// A bidirectional cursor over the store's key order.
///
/// A fresh iterator is positioned before the first entry. `seek` lands
/// on the first entry at or after the given key; `next`/`prev` step and
/// report whether the cursor is on an entry afterwards.
pub trait StoreIterator: Send {
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self) -> bool;
    fn prev(&mut self) -> bool;
    fn valid(&self) -> bool;
    /// Key at the cursor; empty when not valid.
    fn key(&self) -> &[u8];
    /// Value at the cursor; empty when not valid.
    fn value(&self) -> &[u8];
}
