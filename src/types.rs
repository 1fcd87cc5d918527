//! Core type definitions for the dispatch engine
//!
//! This module defines the shared vocabulary of the queue engine: the
//! per-queue configuration, the task record and its on-disk codec, the
//! persisted queue record, and the error taxonomy used across the
//! dispatch pipeline and the registry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Result alias used throughout the queue engine.
pub type QueueResult<T> = Result<T, QueueError>;

/// Current schema version of the persisted queue record.
pub const QUEUE_RECORD_SCHEMA_VERSION: u32 = 1;

/// Magic bytes prefixing every persisted task value.
pub const TASK_MAGIC: &[u8; 4] = b"TASK";

/// Fixed header size of the persisted task value (magic + tries + delay +
/// target length, four bytes each).
pub const TASK_HEADER_LEN: usize = 16;

/// Upper bound on a task's retry backoff, in seconds. Doubling stops
/// here instead of wrapping the counter.
pub const MAX_RETRY_DELAY_SECS: u32 = 86_400;

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Per-queue dispatch limits, immutable after queue creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of simultaneous in-flight POSTs for this queue.
    pub max_concurrent: u32,
    /// Maximum task dequeues per second. Zero disables throttling.
    pub max_rate: u32,
    /// Per-attempt timeout in seconds, bounding both connect and
    /// response wait on the dispatch client.
    pub task_timeout: u32,
    /// Attempts per task before giving up. Zero retries forever.
    pub task_max_tries: u32,
}

impl QueueConfig {
    /// Validate the limits a queue can be created with.
    pub fn validate(&self) -> QueueResult<()> {
        if self.max_concurrent == 0 {
            return Err(QueueError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.task_timeout == 0 {
            return Err(QueueError::InvalidConfig(
                "task_timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persisted representation of a queue, stored under `"m" NUL <id>`.
///
/// The record is explicit versioned JSON; decoding ignores unknown
/// fields and rejects records written with a different schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub schema_version: u32,
    pub id: String,
    pub created_at_unix: i64,
    pub config: QueueConfig,
}

impl QueueRecord {
    /// Build a fresh version-1 record stamped with the current time.
    pub fn new(id: String, config: QueueConfig) -> Self {
        Self {
            schema_version: QUEUE_RECORD_SCHEMA_VERSION,
            id,
            created_at_unix: unix_now(),
            config,
        }
    }

    /// Serialize the record for storage.
    pub fn encode(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| QueueError::Codec(e.to_string()))
    }

    /// Decode a stored record, rejecting unknown schema versions.
    pub fn decode(value: &[u8]) -> QueueResult<Self> {
        let record: QueueRecord =
            serde_json::from_slice(value).map_err(|e| QueueError::Codec(e.to_string()))?;
        if record.schema_version != QUEUE_RECORD_SCHEMA_VERSION {
            return Err(QueueError::Codec(format!(
                "unsupported queue record schema version {}",
                record.schema_version
            )));
        }
        Ok(record)
    }
}

/// A single unit of work: one URL to POST one payload to.
///
/// While a task lives in a queue line it also carries its storage key,
/// which the processing epilogue uses to delete the wait-line entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// 32-character lowercase hex identifier.
    pub id: String,
    /// Storage key of the live line entry. Not part of the wire value.
    #[serde(skip)]
    pub key: Vec<u8>,
    /// Target URL, validated only at dispatch time.
    pub target: String,
    /// Opaque body forwarded verbatim as `application/json`.
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    /// Attempts made so far.
    pub tries: u32,
    /// Current backoff in seconds.
    pub delay: u32,
}

fn serialize_payload<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

impl Task {
    /// Encode the task into its persisted value:
    ///
    /// ```text
    /// offset  size  field
    ///  0      4    magic  "TASK"
    ///  4      4    tries          u32 little-endian
    ///  8      4    delay seconds  u32 little-endian
    /// 12      4    target length  u32 little-endian (= L)
    /// 16      L    target bytes
    /// 16+L    *    payload bytes
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(TASK_HEADER_LEN + self.target.len() + self.payload.len());
        out.extend_from_slice(TASK_MAGIC);
        out.extend_from_slice(&self.tries.to_le_bytes());
        out.extend_from_slice(&self.delay.to_le_bytes());
        out.extend_from_slice(&(self.target.len() as u32).to_le_bytes());
        out.extend_from_slice(self.target.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a task from its storage key and persisted value. The task
    /// id is the key segment after the final NUL separator.
    pub fn decode(key: &[u8], value: &[u8]) -> QueueResult<Task> {
        if value.len() < TASK_HEADER_LEN {
            return Err(QueueError::Codec(format!(
                "task value too short: {} bytes",
                value.len()
            )));
        }
        if &value[0..4] != TASK_MAGIC {
            return Err(QueueError::Codec("bad task value magic".to_string()));
        }
        let tries = u32::from_le_bytes([value[4], value[5], value[6], value[7]]);
        let delay = u32::from_le_bytes([value[8], value[9], value[10], value[11]]);
        let target_len =
            u32::from_le_bytes([value[12], value[13], value[14], value[15]]) as usize;
        if target_len > value.len() - TASK_HEADER_LEN {
            return Err(QueueError::Codec(format!(
                "task target length {} exceeds value size",
                target_len
            )));
        }
        let target = std::str::from_utf8(&value[TASK_HEADER_LEN..TASK_HEADER_LEN + target_len])
            .map_err(|_| QueueError::Codec("task target is not valid UTF-8".to_string()))?
            .to_string();
        let payload = value[TASK_HEADER_LEN + target_len..].to_vec();

        let id_start = key
            .iter()
            .rposition(|&b| b == 0x00)
            .map(|i| i + 1)
            .unwrap_or(0);
        let id = std::str::from_utf8(&key[id_start..])
            .map_err(|_| QueueError::Codec("task id in key is not valid UTF-8".to_string()))?
            .to_string();

        Ok(Task {
            id,
            key: key.to_vec(),
            target,
            payload,
            tries,
            delay,
        })
    }
}

/// Outcome of a single delivery attempt. Only `Unknown` is retryable;
/// everything else is terminal for the task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The target URL does not parse. The task is discarded.
    #[error("invalid task target: {0}")]
    InvalidTarget(String),

    /// The configured attempt budget is exhausted.
    #[error("max tries reached ({0})")]
    MaxTries(u32),

    /// The target answered 4xx; retrying the same request is pointless.
    #[error("target rejected task: HTTP {0}")]
    BadRequest(u16),

    /// Transport failure or a non-2xx/4xx response; retried with backoff.
    #[error("task delivery failed: {0}")]
    Unknown(String),
}

impl TaskError {
    /// Whether the attempt should be rescheduled with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Unknown(_))
    }
}

/// Errors surfaced by the queue engine and registry.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No queue with the given id is registered.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// A queue with the given id already exists.
    #[error("queue already exists: {0}")]
    QueueAlreadyExist(String),

    /// The controller has been stopped and no longer accepts calls.
    #[error("queue registry is not initialized")]
    NotInitialized,

    /// Queue ids are restricted to non-empty lowercase `[a-z0-9]+`.
    #[error("invalid queue id: {0}")]
    InvalidQueueId(String),

    /// The queue configuration failed validation.
    #[error("invalid queue config: {0}")]
    InvalidConfig(String),

    /// The same-second wait-line counter overflowed (99 999 inserts in
    /// one second on one queue).
    #[error("too many tasks added this second")]
    TooManyAtOnce,

    /// The underlying ordered store failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A persisted record did not decode.
    #[error("corrupt record: {0}")]
    Codec(String),

    /// Unexpected internal failure (client construction and the like).
    #[error("internal error: {0}")]
    Internal(String),
}
