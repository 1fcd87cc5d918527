//! Per-queue dispatch manager
//!
//! One `QueueManager` owns everything a single queue needs to run: the
//! two on-disk lines, the concurrency gate, the shared HTTP client, the
//! live stats, and the two latency sketches. `start` brings up the two
//! long-lived loops (the wait-line drain and the schedule-line tick);
//! `stop` broadcasts cancellation, joins both loops, and waits for
//! in-flight POSTs to finish by reacquiring the full permit count.
//!
//! The lines never reach back into the manager: the drain is handed the
//! gate, the cancellation token, and a dispatch closure, and the tick
//! loop is handed a promote closure over the wait line.
//!
//! ## Task lifecycle
//!
//! ```text
//! add_task ──► wait line ──► drain ──► POST ──► 2xx/4xx/max-tries: done
//!     │            ▲                    │
//!     │ scheduled  │ promote            │ retryable failure
//!     ▼            │                    ▼
//! schedule line ◄──┴──────── reschedule at now + backoff
//! ```
//!
//! The wait-line entry is deleted only after any reschedule insert, so
//! a crash in between leaves the task present twice rather than lost.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::quantile::{QuantileStream, DEFAULT_TARGETS};
use crate::queue::processor;
use crate::queue::schedule::ScheduleLine;
use crate::queue::wait::WaitLine;
use crate::stats::{Stats, StatsSnapshot};
use crate::store::Store;
use crate::types::{
    unix_now, QueueConfig, QueueError, QueueRecord, QueueResult, Task, MAX_RETRY_DELAY_SECS,
};

/// Lifecycle states of a queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    New,
    Running,
    Stopping,
    Stopped,
}

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// The three target quantiles of a latency sketch, plus the sample
/// count they were computed over.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencyQuantiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub samples: u64,
}

pub struct QueueManager {
    id: String,
    created_at_unix: i64,
    config: QueueConfig,
    stats: Arc<Stats>,
    add_quantile: Mutex<QuantileStream>,
    process_quantile: Mutex<QuantileStream>,
    client: reqwest::Client,
    wait: Arc<WaitLine>,
    schedule: Arc<ScheduleLine>,
    gate: Arc<Semaphore>,
    token: CancellationToken,
    loops: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    state: AtomicU8,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("id", &self.id)
            .field("created_at_unix", &self.created_at_unix)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Build a manager from its persisted record over the shared store.
    /// The manager is inert until [`QueueManager::start`] is called.
    pub fn new(record: QueueRecord, store: Arc<dyn Store>) -> QueueResult<Arc<Self>> {
        record.config.validate()?;

        let timeout = Duration::from_secs(u64::from(record.config.task_timeout));
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Internal(format!("http client: {e}")))?;

        let stats = Arc::new(Stats::default());
        let wait = Arc::new(WaitLine::new(
            &record.id,
            store.clone(),
            stats.clone(),
            record.config.max_rate,
        ));
        let schedule = Arc::new(ScheduleLine::new(&record.id, store, stats.clone()));

        Ok(Arc::new(Self {
            id: record.id,
            created_at_unix: record.created_at_unix,
            config: record.config,
            stats,
            add_quantile: Mutex::new(QuantileStream::targeted(&DEFAULT_TARGETS)),
            process_quantile: Mutex::new(QuantileStream::targeted(&DEFAULT_TARGETS)),
            client,
            wait,
            schedule,
            gate: Arc::new(Semaphore::new(record.config.max_concurrent as usize)),
            token: CancellationToken::new(),
            loops: tokio::sync::Mutex::new(Vec::new()),
            state: AtomicU8::new(STATE_NEW),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn created_at_unix(&self) -> i64 {
        self.created_at_unix
    }

    pub fn state(&self) -> QueueState {
        match self.state.load(Ordering::SeqCst) {
            STATE_NEW => QueueState::New,
            STATE_RUNNING => QueueState::Running,
            STATE_STOPPING => QueueState::Stopping,
            _ => QueueState::Stopped,
        }
    }

    /// The persisted form of this queue.
    pub fn record(&self) -> QueueRecord {
        QueueRecord {
            schema_version: crate::types::QUEUE_RECORD_SCHEMA_VERSION,
            id: self.id.clone(),
            created_at_unix: self.created_at_unix,
            config: self.config,
        }
    }

    /// Bring up the drain and tick loops. Gauges are rebuilt from the
    /// store first so they reflect entries that survived a restart.
    pub async fn start(self: &Arc<Self>) -> QueueResult<()> {
        if self
            .state
            .compare_exchange(STATE_NEW, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.stats.in_queue.set(self.wait.count() as i64);
        self.stats.in_scheduled.set(self.schedule.count() as i64);

        info!(queue = %self.id, workers = self.config.max_concurrent, "starting queue");

        let drain = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let wait = manager.wait.clone();
                let token = manager.token.clone();
                let gate = manager.gate.clone();
                let dispatcher = Arc::clone(&manager);
                wait.run(token, gate, move |task, permit| {
                    dispatcher.dispatch(task, permit);
                })
                .await;
            })
        };

        let tick = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let schedule = manager.schedule.clone();
                let wait = manager.wait.clone();
                schedule
                    .run(manager.token.clone(), move |mut task| wait.put(&mut task))
                    .await;
            })
        };

        self.loops.lock().await.extend([drain, tick]);
        Ok(())
    }

    /// Run one task attempt on its own tokio task. The wait-line entry
    /// is deleted in the epilogue, after any reschedule insert, and the
    /// concurrency permit is released when the attempt is fully done.
    fn dispatch(self: &Arc<Self>, mut task: Task, permit: OwnedSemaphorePermit) {
        let manager = Arc::clone(self);
        self.stats.in_processing.add(1);

        tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let wait_key = task.key.clone();

            let outcome = processor::process_attempt(
                &manager.client,
                &manager.id,
                &manager.config,
                &manager.stats,
                &task,
            )
            .await;

            let elapsed_ms = started.elapsed().as_millis() as i64;
            manager.stats.total_time.add(elapsed_ms);

            match outcome {
                Ok(()) => {
                    manager.stats.time_last_ok.set(unix_now());
                    manager
                        .process_quantile
                        .lock()
                        .unwrap()
                        .insert(elapsed_ms as f64);
                }
                Err(err) if err.is_retryable() => {
                    task.delay = (task.delay.max(1).saturating_mul(2)).min(MAX_RETRY_DELAY_SECS);
                    task.tries += 1;
                    let due = unix_now() + i64::from(task.delay);
                    debug!(queue = %manager.id, task = %task.id, delay = task.delay,
                        "rescheduling task");
                    match manager.schedule.put_at(&mut task, due) {
                        Ok(()) => {
                            manager.stats.total_processed_rescheduled.add(1);
                        }
                        Err(err) => {
                            error!(queue = %manager.id, task = %task.id, error = %err,
                                "failed to reschedule task");
                            manager.stats.store_errors.add(1);
                        }
                    }
                }
                Err(_) => {
                    // Terminal outcome; nothing further to do.
                }
            }

            if let Err(err) = manager.wait.delete(&wait_key) {
                error!(queue = %manager.id, task = %task.id, error = %err,
                    "failed to delete processed wait entry");
                manager.stats.store_errors.add(1);
            }
            manager.stats.in_processing.add(-1);
        });
    }

    /// Accept a task into the queue. `scheduled == 0` enqueues it for
    /// immediate dispatch; any other value schedules it at that unix
    /// second.
    pub fn add_task(&self, target: &str, payload: Vec<u8>, scheduled: i64) -> QueueResult<Task> {
        let started = Instant::now();
        let mut task = Task {
            id: new_task_id(),
            key: Vec::new(),
            target: target.to_string(),
            payload,
            tries: 0,
            delay: 0,
        };

        if scheduled == 0 {
            self.wait.put(&mut task)?;
        } else {
            self.schedule.put_at(&mut task, scheduled)?;
        }

        self.stats.total_received.add(1);
        self.add_quantile
            .lock()
            .unwrap()
            .insert(started.elapsed().as_millis() as f64);
        Ok(task)
    }

    /// First page of the wait line in dispatch order.
    pub fn get_tasks(&self) -> QueueResult<Vec<Task>> {
        self.wait.get_all()
    }

    /// First page of the schedule line in due order.
    pub fn get_scheduled_tasks(&self) -> QueueResult<Vec<Task>> {
        self.schedule.get_all()
    }

    /// Drop every entry from both lines. Returns how many were removed.
    pub fn flush(&self) -> QueueResult<u64> {
        let removed = self.wait.clear()? + self.schedule.clear()?;
        info!(queue = %self.id, removed, "queue flushed");
        Ok(removed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Quantiles of add-task latency, milliseconds.
    pub fn add_latency_quantiles(&self) -> LatencyQuantiles {
        Self::quantiles(&self.add_quantile)
    }

    /// Quantiles of task processing latency, milliseconds.
    pub fn processing_latency_quantiles(&self) -> LatencyQuantiles {
        Self::quantiles(&self.process_quantile)
    }

    fn quantiles(sketch: &Mutex<QuantileStream>) -> LatencyQuantiles {
        let mut sketch = sketch.lock().unwrap();
        LatencyQuantiles {
            p50: sketch.query(0.50),
            p90: sketch.query(0.90),
            p99: sketch.query(0.99),
            samples: sketch.count(),
        }
    }

    /// Broadcast stop to both loops, join them, and wait for in-flight
    /// attempts to complete. Idempotent.
    pub async fn stop(&self) {
        match self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_NEW) => {
                self.state.store(STATE_STOPPED, Ordering::SeqCst);
                return;
            }
            Err(_) => return,
        }

        info!(queue = %self.id, "stopping queue");
        self.token.cancel();
        // A drain parked at the end of the line wakes to observe it.
        self.wait.wake();

        for handle in self.loops.lock().await.drain(..) {
            let _ = handle.await;
        }

        // Every in-flight attempt holds one permit; reacquiring the full
        // count means they have all finished.
        let _ = self.gate.acquire_many(self.config.max_concurrent).await;

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!(queue = %self.id, "queue stopped");
    }
}

/// Fresh 32-character lowercase-hex task id.
fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
