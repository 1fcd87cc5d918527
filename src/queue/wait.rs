//! Wait line: the ready-to-run sub-queue
//!
//! Tasks are served in FIFO insertion order, bounded by the queue's
//! concurrency gate and rate throttle. The order token is the insertion
//! second (ten digits) plus a five-digit same-second counter, so lexical
//! key order equals insertion order down to 1/100 000 of a second.
//!
//! The drain loop walks the bounded key range, hands each task off once
//! a concurrency slot is free, and parks on a notification when it runs
//! off the end. A `put` from any direction (new task, promoted schedule
//! entry) signals the notification; the drain then re-opens a cursor at
//! the last-read key and continues. Cancellation is observed at the top
//! of every iteration, before each hand-off, and inside every wait.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::line::{QueueLine, LIST_PAGE_LIMIT};
use crate::stats::Stats;
use crate::store::{Store, WAIT_LINE_TAG};
use crate::types::{unix_now, QueueError, QueueResult, Task};

/// Highest same-second counter value; one more insert in the same
/// second fails with [`QueueError::TooManyAtOnce`].
const MAX_PER_SECOND: u32 = 99_999;

#[derive(Debug)]
struct SecondCounter {
    second: i64,
    count: u32,
}

pub(crate) struct WaitLine {
    line: QueueLine,
    rewind: Notify,
    counter: Mutex<SecondCounter>,
    max_rate: u32,
}

impl WaitLine {
    pub fn new(queue_id: &str, store: Arc<dyn Store>, stats: Arc<Stats>, max_rate: u32) -> Self {
        Self {
            line: QueueLine::new(
                queue_id,
                "waitinglist",
                WAIT_LINE_TAG,
                store,
                stats,
                |s| &s.in_queue,
            ),
            rewind: Notify::new(),
            counter: Mutex::new(SecondCounter {
                second: 0,
                count: 0,
            }),
            max_rate,
        }
    }

    /// Append a task at the current tail and wake the drain.
    pub fn put(&self, task: &mut Task) -> QueueResult<()> {
        let order = self.next_order_token()?;
        self.line.put(task, &order)?;
        self.rewind.notify_one();
        Ok(())
    }

    /// Next `{second:010}{counter:05}` token. The counter resets when
    /// the second rolls over; within one second tokens are strictly
    /// increasing.
    fn next_order_token(&self) -> QueueResult<String> {
        let now = unix_now();
        let mut counter = self.counter.lock().unwrap();
        if counter.second != now {
            counter.second = now;
            counter.count = 0;
        } else if counter.count >= MAX_PER_SECOND {
            return Err(QueueError::TooManyAtOnce);
        } else {
            counter.count += 1;
        }
        Ok(format!("{:010}{:05}", counter.second, counter.count))
    }

    /// Wake a drain parked at the end of the line, e.g. so it can
    /// observe cancellation.
    pub fn wake(&self) {
        self.rewind.notify_one();
    }

    pub fn delete(&self, key: &[u8]) -> QueueResult<()> {
        self.line.delete(key)
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

    /// Drain loop. Runs until cancelled; `dispatch` receives each task
    /// together with the concurrency permit that was acquired for it
    /// and must release the permit when the attempt finishes.
    pub async fn run<F>(
        &self,
        token: CancellationToken,
        gate: Arc<Semaphore>,
        dispatch: F,
    ) where
        F: Fn(Task, OwnedSemaphorePermit),
    {
        let mut last_key: Option<Vec<u8>> = None;

        loop {
            if token.is_cancelled() {
                info!(line = "waitinglist", "drain stopping");
                return;
            }

            let mut iter = self.line.store().new_iterator(None);
            match &last_key {
                Some(key) => {
                    iter.seek(key);
                    if !iter.valid() || iter.key() != key.as_slice() {
                        // The last-read entry is gone and the cursor
                        // landed on its successor; step back once so the
                        // loop below does not skip that neighbor.
                        iter.prev();
                    }
                }
                None => {
                    iter.seek(self.line.prefix());
                    iter.prev();
                }
            }

            while iter.next() {
                if token.is_cancelled() {
                    info!(line = "waitinglist", "drain stopping");
                    return;
                }

                let key = iter.key().to_vec();
                if key.as_slice() > self.line.suffix() {
                    // End of this line's keyspace.
                    break;
                }
                let value = iter.value().to_vec();
                last_key = Some(key.clone());

                let task = match Task::decode(&key, &value) {
                    Ok(task) => task,
                    Err(err) => {
                        // A corrupt entry would wedge the FIFO head
                        // forever; drop it and keep draining.
                        warn!(error = %err, "dropping undecodable wait entry");
                        self.line.stats().store_errors.add(1);
                        if let Err(err) = self.line.delete(&key) {
                            warn!(error = %err, "failed to drop corrupt wait entry");
                        }
                        continue;
                    }
                };

                debug!(task = %task.id, "wait line handing off task");

                // Block until a concurrency slot frees up.
                let permit = tokio::select! {
                    _ = token.cancelled() => return,
                    permit = gate.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                dispatch(task, permit);

                // Throttle dequeues per second.
                if self.max_rate > 0 {
                    let pause = Duration::from_secs(1) / self.max_rate;
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }

            drop(iter);

            tokio::select! {
                _ = token.cancelled() => {
                    info!(line = "waitinglist", "drain stopping");
                    return;
                }
                _ = self.rewind.notified() => {}
            }
        }
    }
}
