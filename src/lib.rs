//! QDo: persistent HTTP task dispatch
//!
//! QDo accepts tasks (a target URL plus an opaque JSON payload,
//! optionally scheduled for a future wall-clock instant) into named
//! queues and guarantees each one is POSTed to its target with bounded
//! concurrency, bounded rate, a per-attempt timeout, and
//! exponential-backoff retries up to a configured cap. Queues and their
//! tasks live in an embedded ordered key-value store and survive
//! process restarts. Delivery is at-least-once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Controller                          │
//! │   registry of queues, persisted as records in the store  │
//! ├──────────────────────────────────────────────────────────┤
//! │  QueueManager (one per queue)                            │
//! │  ┌────────────┐   promote   ┌───────────────┐            │
//! │  │ schedule   │────────────►│  wait line    │            │
//! │  │ line (due) │             │  (FIFO)       │            │
//! │  └────────────┘             └──────┬────────┘            │
//! │        ▲                           │ drain (gate + rate) │
//! │        │ reschedule                ▼                     │
//! │        └─────────────────── task processor ──► HTTP POST │
//! ├──────────────────────────────────────────────────────────┤
//! │          ordered KV store (sled), one keyspace           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Both queue lines are plain key ranges: the order token inside each
//! key is chosen so that ascending lexical order equals FIFO insertion
//! order (wait line) or earliest-due order (schedule line). Everything
//! the engine knows is recoverable by scanning the store.
//!
//! ## Key components
//!
//! - [`queue::Controller`]: create, load, remove, and stop queues
//! - [`queue::QueueManager`]: one queue's lines, workers, and stats
//! - [`store::Store`]: the ordered KV contract, implemented on sled
//! - [`stats::Stats`]: lock-free gauges and totals per queue
//! - [`quantile::QuantileStream`]: p50/p90/p99 latency sketches
//! - [`http`]: the JSON admin API served by the `qdo` binary

pub mod config;
pub mod http;
pub mod quantile;
pub mod queue;
pub mod stats;
pub mod store;
pub mod types;

pub use config::ServiceConfig;
pub use queue::{Controller, LatencyQuantiles, QueueManager, QueueState};
pub use stats::{AtomicInt, Stats, StatsSnapshot};
pub use store::{SledStore, Store};
pub use types::{QueueConfig, QueueError, QueueRecord, QueueResult, Task, TaskError};

/// Crate version, surfaced in logs at start-up.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
