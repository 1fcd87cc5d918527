//! Schedule line: the future-due sub-queue
//!
//! Tasks waiting on a wall-clock instant live here. The order token is
//! the due unix-second, zero-padded to 19 digits so lexical key order
//! equals numeric due order for any representable timestamp. A tick
//! loop scans everything due at or before the current second, hands
//! each task to the promote callback (which re-inserts it into the wait
//! line), and deletes the schedule entry afterwards, in that order, so
//! a crash in between duplicates work instead of losing it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::line::{QueueLine, LIST_PAGE_LIMIT};
use crate::stats::Stats;
use crate::store::{Store, KEY_TERM, SCHEDULE_LINE_TAG};
use crate::types::{unix_now, QueueResult, Task};

/// Width the due-second is padded to inside schedule keys.
const DUE_TOKEN_WIDTH: usize = 19;

/// How often the tick loop scans for due entries.
pub(crate) const DEFAULT_READ_FREQ: Duration = Duration::from_secs(1);

pub(crate) struct ScheduleLine {
    line: QueueLine,
    read_freq: Duration,
}

impl ScheduleLine {
    pub fn new(queue_id: &str, store: Arc<dyn Store>, stats: Arc<Stats>) -> Self {
        Self {
            line: QueueLine::new(
                queue_id,
                "scheduler",
                SCHEDULE_LINE_TAG,
                store,
                stats,
                |s| &s.in_scheduled,
            ),
            read_freq: DEFAULT_READ_FREQ,
        }
    }

    fn due_token(due_unix: i64) -> String {
        format!("{:0width$}", due_unix.max(0), width = DUE_TOKEN_WIDTH)
    }

    /// Insert a task due at the given unix second.
    pub fn put_at(&self, task: &mut Task, due_unix: i64) -> QueueResult<()> {
        self.line.put(task, &Self::due_token(due_unix))
    }

    pub fn get_all(&self) -> QueueResult<Vec<Task>> {
        self.line.get_all(LIST_PAGE_LIMIT)
    }

    pub fn count(&self) -> u64 {
        self.line.count()
    }

    pub fn clear(&self) -> QueueResult<u64> {
        self.line.clear()
    }

    /// Tick loop. Every `read_freq` the line is scanned for entries due
    /// at or before now; each is promoted and then deleted. Runs until
    /// cancelled.
    pub async fn run<F>(&self, token: CancellationToken, promote: F)
    where
        F: Fn(Task) -> QueueResult<()>,
    {
        loop {
            if token.is_cancelled() {
                info!(line = "scheduler", "tick loop stopping");
                return;
            }

            self.tick(&promote);

            tokio::select! {
                _ = token.cancelled() => {
                    info!(line = "scheduler", "tick loop stopping");
                    return;
                }
                _ = tokio::time::sleep(self.read_freq) => {}
            }
        }
    }

    /// One promotion pass over everything due at or before now.
    fn tick<F>(&self, promote: &F)
    where
        F: Fn(Task) -> QueueResult<()>,
    {
        // Upper bound covering every key whose due-second is <= now:
        // the terminator sorts after the NUL that precedes the task id.
        let mut bound = self.line.prefix().to_vec();
        bound.extend_from_slice(Self::due_token(unix_now()).as_bytes());
        bound.push(KEY_TERM);

        let mut iter = self.line.store().new_iterator(None);
        iter.seek(self.line.prefix());
        while iter.valid() {
            let key = iter.key().to_vec();
            if key.as_slice() > bound.as_slice() {
                // Everything from here on is due in the future.
                break;
            }

            match Task::decode(&key, iter.value()) {
                Ok(task) => {
                    debug!(task = %task.id, "promoting scheduled task");
                    if let Err(err) = promote(task) {
                        // Leave the entry in place; the next tick will
                        // retry the promotion.
                        error!(error = %err, "failed to promote scheduled task");
                        self.line.stats().store_errors.add(1);
                        break;
                    }
                    if let Err(err) = self.line.delete(&key) {
                        error!(error = %err, "failed to delete promoted schedule entry");
                        self.line.stats().store_errors.add(1);
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "dropping undecodable schedule entry");
                    self.line.stats().store_errors.add(1);
                    if let Err(err) = self.line.delete(&key) {
                        warn!(error = %err, "failed to drop corrupt schedule entry");
                        break;
                    }
                }
            }

            if !iter.next() {
                break;
            }
        }
    }
}
