//! Queue registry
//!
//! The `Controller` owns the set of running queue managers and the
//! shared store. It is an explicit value: callers create it once and
//! thread it through whatever surface exposes the queues (the admin API
//! holds it in its state). On start-up it loads every persisted queue
//! record and brings the corresponding manager up; at shutdown it stops
//! them all and flushes the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::queue::manager::QueueManager;
use crate::store::{Store, KEY_SEP, KEY_TERM, QUEUE_RECORD_TAG};
use crate::types::{QueueConfig, QueueError, QueueRecord, QueueResult};

pub struct Controller {
    store: Arc<dyn Store>,
    queues: RwLock<HashMap<String, Arc<QueueManager>>>,
    stopped: AtomicBool,
}

impl Controller {
    /// Open the registry over a store: load every persisted queue
    /// record and start a manager for each.
    pub async fn start(store: Arc<dyn Store>) -> QueueResult<Arc<Controller>> {
        let controller = Arc::new(Controller {
            store: store.clone(),
            queues: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        });

        let records = load_queue_records(&store);
        let mut queues = controller.queues.write().await;
        for record in records {
            let id = record.id.clone();
            let manager = QueueManager::new(record, store.clone())?;
            manager.start().await?;
            queues.insert(id, manager);
        }
        info!(queues = queues.len(), "queue controller started");
        drop(queues);

        Ok(controller)
    }

    /// Create, persist, and start a new queue. The id is lowercased and
    /// must be non-empty `[a-z0-9]+` afterwards.
    pub async fn add_queue(
        &self,
        id: &str,
        config: QueueConfig,
    ) -> QueueResult<Arc<QueueManager>> {
        self.ensure_running()?;
        let id = normalize_queue_id(id)?;
        config.validate()?;

        let mut queues = self.queues.write().await;
        if queues.contains_key(&id) {
            return Err(QueueError::QueueAlreadyExist(id));
        }

        let record = QueueRecord::new(id.clone(), config);
        self.store.put(&record_key(&id), &record.encode()?)?;

        let manager = QueueManager::new(record, self.store.clone())?;
        manager.start().await?;
        queues.insert(id.clone(), manager.clone());
        info!(queue = %id, "queue created");
        Ok(manager)
    }

    /// Remove a queue: delete its persisted record first, then stop it
    /// in the background so in-flight tasks can drain. If the record
    /// delete fails the queue keeps running and the error is returned.
    pub async fn remove_queue(&self, id: &str) -> QueueResult<()> {
        self.ensure_running()?;

        let mut queues = self.queues.write().await;
        let manager = queues
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(id.to_string()))?;

        self.store.delete(&record_key(id))?;
        queues.remove(id);
        drop(queues);

        info!(queue = %id, "queue removed, draining in background");
        tokio::spawn(async move {
            manager.stop().await;
        });
        Ok(())
    }

    pub async fn get_queue(&self, id: &str) -> QueueResult<Arc<QueueManager>> {
        self.ensure_running()?;
        self.queues
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(id.to_string()))
    }

    /// All registered queues, sorted by id for stable listings.
    pub async fn get_all_queues(&self) -> Vec<Arc<QueueManager>> {
        let mut managers: Vec<_> = self.queues.read().await.values().cloned().collect();
        managers.sort_by(|a, b| a.id().cmp(b.id()));
        managers
    }

    /// Stop every queue, waiting for in-flight tasks, then flush the
    /// store. Further registry calls fail with `NotInitialized`.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping all queues");
        let managers: Vec<_> = self.queues.write().await.drain().map(|(_, m)| m).collect();
        for manager in managers {
            manager.stop().await;
        }
        if let Err(err) = self.store.close() {
            error!(error = %err, "store close on shutdown failed");
        }
        info!("queue controller stopped");
    }

    fn ensure_running(&self) -> QueueResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::NotInitialized);
        }
        Ok(())
    }
}

fn record_key(id: &str) -> Vec<u8> {
    let mut key = vec![QUEUE_RECORD_TAG, KEY_SEP];
    key.extend_from_slice(id.as_bytes());
    key
}

/// Lowercase and validate a queue id.
fn normalize_queue_id(raw: &str) -> QueueResult<String> {
    let id = raw.trim().to_ascii_lowercase();
    if id.is_empty() {
        return Err(QueueError::InvalidQueueId("id is empty".to_string()));
    }
    if !id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(QueueError::InvalidQueueId(format!(
            "{raw:?} contains characters outside [a-z0-9]"
        )));
    }
    Ok(id)
}

/// Scan the record keyspace and decode what it holds. Records that do
/// not decode are logged and skipped rather than refusing start-up.
fn load_queue_records(store: &Arc<dyn Store>) -> Vec<QueueRecord> {
    let start = [QUEUE_RECORD_TAG, KEY_SEP];
    let end = [QUEUE_RECORD_TAG, KEY_TERM];

    let mut records = Vec::new();
    let mut iter = store.new_iterator(None);
    iter.seek(&start);
    while iter.valid() {
        if iter.key() > end.as_slice() {
            break;
        }
        match QueueRecord::decode(iter.value()) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(error = %err, "skipping undecodable queue record");
            }
        }
        if !iter.next() {
            break;
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledStore;

    fn config() -> QueueConfig {
        QueueConfig {
            max_concurrent: 1,
            max_rate: 0,
            task_timeout: 1,
            task_max_tries: 1,
        }
    }

    async fn harness() -> (tempfile::TempDir, Arc<Controller>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
        let controller = Controller::start(store).await.unwrap();
        (dir, controller)
    }

    #[test]
    fn test_queue_id_normalization() {
        assert_eq!(normalize_queue_id(" Billing7 ").unwrap(), "billing7");
        assert!(normalize_queue_id("").is_err());
        assert!(normalize_queue_id("   ").is_err());
        assert!(normalize_queue_id("my queue").is_err());
        assert!(normalize_queue_id("a_b").is_err());
    }

    #[tokio::test]
    async fn test_add_get_remove_queue() {
        let (_dir, controller) = harness().await;

        controller.add_queue("Jobs", config()).await.unwrap();
        // Lookup uses the normalized id.
        let queue = controller.get_queue("jobs").await.unwrap();
        assert_eq!(queue.id(), "jobs");

        let err = controller.add_queue("jobs", config()).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueAlreadyExist(_)));

        controller.remove_queue("jobs").await.unwrap();
        let err = controller.get_queue("jobs").await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(_)));

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_remove_missing_queue() {
        let (_dir, controller) = harness().await;
        let err = controller.remove_queue("ghost").await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(_)));
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_queues_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store: Arc<dyn Store> = Arc::new(SledStore::open(&path).unwrap());
            let controller = Controller::start(store).await.unwrap();
            controller.add_queue("persist", config()).await.unwrap();
            controller.stop().await;
        }

        let store: Arc<dyn Store> = Arc::new(SledStore::open(&path).unwrap());
        let controller = Controller::start(store).await.unwrap();
        let queue = controller.get_queue("persist").await.unwrap();
        assert_eq!(queue.config(), &config());
        assert_eq!(controller.get_all_queues().await.len(), 1);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_controller_rejects_calls() {
        let (_dir, controller) = harness().await;
        controller.stop().await;
        let err = controller.add_queue("x", config()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotInitialized));
        let err = controller.get_queue("x").await.unwrap_err();
        assert!(matches!(err, QueueError::NotInitialized));
    }
}
