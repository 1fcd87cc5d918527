//! Per-queue dispatch engine
//!
//! A queue is two ordered lines in the shared store plus the machinery
//! that moves tasks between them: the wait line serves ready tasks in
//! FIFO order under the concurrency gate and rate throttle, the
//! schedule line holds future-due tasks and promotes them on a tick,
//! and the processor POSTs each task and classifies the outcome. The
//! [`manager::QueueManager`] owns one queue's pieces; the
//! [`controller::Controller`] owns the managers.

pub mod controller;
pub(crate) mod line;
pub mod manager;
pub(crate) mod processor;
pub(crate) mod schedule;
pub(crate) mod wait;

pub use controller::Controller;
pub use manager::{LatencyQuantiles, QueueManager, QueueState};
