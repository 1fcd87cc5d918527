//! Single-attempt task delivery
//!
//! One call is one POST: validate the target, check the attempt budget,
//! send the payload, drain the response, and classify the outcome. The
//! retry decision itself is driven by the queue manager; this module
//! only reports which kind of outcome occurred.

use reqwest::header::CONTENT_TYPE;
use tracing::{error, info};
use url::Url;

use crate::stats::Stats;
use crate::types::{QueueConfig, Task, TaskError};

/// Execute one delivery attempt for `task`.
///
/// Classification:
/// 2xx is success; 4xx is terminal (retrying the identical request
/// cannot help); transport failures and every other status, including
/// 5xx, are retryable.
pub(crate) async fn process_attempt(
    client: &reqwest::Client,
    queue_id: &str,
    config: &QueueConfig,
    stats: &Stats,
    task: &Task,
) -> Result<(), TaskError> {
    info!(queue = queue_id, task = %task.id, tries = task.tries, "processing task");

    let url = match Url::parse(&task.target) {
        Ok(url) => url,
        Err(err) => {
            error!(queue = queue_id, task = %task.id, error = %err, "invalid target URL");
            stats.total_processed_error.add(1);
            return Err(TaskError::InvalidTarget(err.to_string()));
        }
    };

    if config.task_max_tries > 0 && task.tries >= config.task_max_tries {
        info!(queue = queue_id, task = %task.id, tries = task.tries, "max tries reached");
        return Err(TaskError::MaxTries(task.tries));
    }

    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(task.payload.clone())
        .send()
        .await;

    match response {
        Ok(response) => {
            let status = response.status();
            // Drain the body so the connection can be reused.
            let _ = response.bytes().await;

            if status.is_success() {
                info!(queue = queue_id, task = %task.id, status = status.as_u16(),
                    "task completed successfully");
                stats.total_processed_ok.add(1);
                Ok(())
            } else if status.is_client_error() {
                info!(queue = queue_id, task = %task.id, status = status.as_u16(),
                    "target rejected task");
                stats.total_processed_error.add(1);
                Err(TaskError::BadRequest(status.as_u16()))
            } else {
                info!(queue = queue_id, task = %task.id, status = status.as_u16(),
                    "unexpected target status");
                stats.total_processed_error.add(1);
                Err(TaskError::Unknown(format!("http status {}", status.as_u16())))
            }
        }
        Err(err) => {
            error!(queue = queue_id, task = %task.id, error = %err, "task delivery failed");
            stats.total_processed_error.add(1);
            Err(TaskError::Unknown(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_tries: u32) -> QueueConfig {
        QueueConfig {
            max_concurrent: 1,
            max_rate: 0,
            task_timeout: 1,
            task_max_tries: max_tries,
        }
    }

    fn task(target: &str, tries: u32) -> Task {
        Task {
            id: "00".repeat(16),
            key: Vec::new(),
            target: target.to_string(),
            payload: b"{}".to_vec(),
            tries,
            delay: 0,
        }
    }

    #[tokio::test]
    async fn test_invalid_target_is_terminal_and_counted() {
        let stats = Stats::default();
        let client = reqwest::Client::new();
        let err = process_attempt(&client, "q", &config(0), &stats, &task("not a url", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTarget(_)));
        assert!(!err.is_retryable());
        assert_eq!(stats.total_processed_error.get(), 1);
    }

    #[tokio::test]
    async fn test_max_tries_is_terminal_and_uncounted() {
        let stats = Stats::default();
        let client = reqwest::Client::new();
        let err = process_attempt(
            &client,
            "q",
            &config(3),
            &stats,
            &task("http://localhost:9999/", 3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskError::MaxTries(3)));
        assert!(!err.is_retryable());
        assert_eq!(stats.total_processed_error.get(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_is_retryable() {
        let stats = Stats::default();
        let client = reqwest::Client::new();
        // Nothing listens on this port.
        let err = process_attempt(
            &client,
            "q",
            &config(0),
            &stats,
            &task("http://127.0.0.1:1/", 0),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stats.total_processed_error.get(), 1);
    }
}
