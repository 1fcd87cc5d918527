//! Base operations shared by the two queue lines
//!
//! A queue line is one logical sub-queue inside the shared ordered
//! store: all keys carry the line's prefix, and a suffix sentinel bounds
//! range scans. Entries are `prefix · order · NUL · task_id`; the order
//! token is chosen by the concrete line so that lexical key order equals
//! the line's semantic order.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::stats::{AtomicInt, Stats};
use crate::store::{Store, KEY_SEP, KEY_TERM, QUEUE_LINE_TAG};
use crate::types::{QueueResult, Task};

/// Default page size for line listings.
pub const LIST_PAGE_LIMIT: usize = 100;

/// Selects which live gauge a line maintains on its shared [`Stats`].
pub(crate) type GaugeFn = fn(&Stats) -> &AtomicInt;

pub(crate) struct QueueLine {
    queue_id: String,
    kind: &'static str,
    store: Arc<dyn Store>,
    stats: Arc<Stats>,
    gauge: GaugeFn,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl QueueLine {
    pub fn new(
        queue_id: &str,
        kind: &'static str,
        line_tag: u8,
        store: Arc<dyn Store>,
        stats: Arc<Stats>,
        gauge: GaugeFn,
    ) -> Self {
        let mut prefix = vec![QUEUE_LINE_TAG, KEY_SEP];
        prefix.extend_from_slice(queue_id.as_bytes());
        prefix.push(KEY_SEP);
        prefix.push(line_tag);
        let mut suffix = prefix.clone();
        prefix.push(KEY_SEP);
        suffix.push(KEY_TERM);

        Self {
            queue_id: queue_id.to_string(),
            kind,
            store,
            stats,
            gauge,
            prefix,
            suffix,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn suffix(&self) -> &[u8] {
        &self.suffix
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Write the task under `prefix · order · NUL · id`, record the key
    /// on the task, and bump the line gauge.
    pub fn put(&self, task: &mut Task, order: &str) -> QueueResult<()> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(order.as_bytes());
        key.push(KEY_SEP);
        key.extend_from_slice(task.id.as_bytes());

        debug!(queue = %self.queue_id, line = self.kind, task = %task.id, "adding task");
        self.store.put(&key, &task.encode())?;
        task.key = key;
        (self.gauge)(&self.stats).add(1);
        Ok(())
    }

    /// Remove an entry and drop the gauge.
    pub fn delete(&self, key: &[u8]) -> QueueResult<()> {
        debug!(queue = %self.queue_id, line = self.kind, "deleting task entry");
        self.store.delete(key)?;
        (self.gauge)(&self.stats).add(-1);
        Ok(())
    }

    /// First page of the line in key order. Entries that fail to decode
    /// are skipped, not fatal; listing is a read-only admin view.
    pub fn get_all(&self, limit: usize) -> QueueResult<Vec<Task>> {
        let mut result = Vec::new();
        let mut iter = self.store.new_iterator(None);
        iter.seek(&self.prefix);
        while iter.valid() && result.len() < limit {
            if iter.key() > self.suffix.as_slice() {
                break;
            }
            match Task::decode(iter.key(), iter.value()) {
                Ok(task) => result.push(task),
                Err(err) => {
                    warn!(queue = %self.queue_id, line = self.kind, error = %err,
                        "skipping undecodable line entry");
                }
            }
            if !iter.next() {
                break;
            }
        }
        Ok(result)
    }

    /// Count every live entry in the line. Used to rebuild the gauges
    /// when a queue starts over a pre-existing store.
    pub fn count(&self) -> u64 {
        let mut total = 0u64;
        let mut iter = self.store.new_iterator(None);
        iter.seek(&self.prefix);
        while iter.valid() {
            if iter.key() > self.suffix.as_slice() {
                break;
            }
            total += 1;
            if !iter.next() {
                break;
            }
        }
        total
    }

    /// Delete every entry in the line, keeping the gauge in step.
    /// Returns the number of entries removed.
    pub fn clear(&self) -> QueueResult<u64> {
        let mut removed = 0u64;
        let mut keys = Vec::new();
        let mut iter = self.store.new_iterator(None);
        iter.seek(&self.prefix);
        while iter.valid() {
            if iter.key() > self.suffix.as_slice() {
                break;
            }
            keys.push(iter.key().to_vec());
            if !iter.next() {
                break;
            }
        }
        drop(iter);
        for key in keys {
            self.delete(&key)?;
            removed += 1;
        }
        Ok(removed)
    }
}
