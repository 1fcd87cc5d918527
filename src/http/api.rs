//! JSON admin API over the queue controller
//!
//! Routes mirror the engine's public operations one-to-one: queue CRUD,
//! task submission and listing, flush, and a stats read combining the
//! live counters with both latency sketches. List responses use a
//! `{object, url, count, data}` envelope. `/metrics` renders the same
//! counters as Prometheus text for scrapers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::queue::manager::{LatencyQuantiles, QueueManager, QueueState};
use crate::queue::Controller;
use crate::stats::StatsSnapshot;
use crate::types::{QueueConfig, QueueError, Task};

/// Build the admin router over a controller handle.
pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/queue", get(list_queues).post(create_queue))
        .route("/api/queue/:queue_id", get(get_queue).delete(delete_queue))
        .route(
            "/api/queue/:queue_id/task",
            get(list_tasks).post(create_task).delete(flush_tasks),
        )
        .route("/api/queue/:queue_id/scheduled", get(list_scheduled))
        .route("/api/queue/:queue_id/stats", get(get_stats))
        .route("/metrics", get(metrics))
        .with_state(controller)
}

#[derive(Debug, Serialize)]
struct ListResult<T> {
    object: &'static str,
    url: String,
    count: usize,
    data: Vec<T>,
}

impl<T> ListResult<T> {
    fn new(url: String, data: Vec<T>) -> Self {
        Self {
            object: "list",
            url,
            count: data.len(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueView {
    id: String,
    created_at_unix: i64,
    state: QueueState,
    config: QueueConfig,
}

impl QueueView {
    fn from_manager(manager: &QueueManager) -> Self {
        Self {
            id: manager.id().to_string(),
            created_at_unix: manager.created_at_unix(),
            state: manager.state(),
            config: *manager.config(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateQueueRequest {
    queue_id: String,
    #[serde(flatten)]
    config: QueueConfig,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    target: String,
    #[serde(default)]
    payload: String,
    /// Unix second to schedule the task at; 0 or absent dispatches it
    /// immediately.
    #[serde(default)]
    scheduled: i64,
}

#[derive(Debug, Serialize)]
struct FlushResult {
    removed: u64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    object: &'static str,
    #[serde(flatten)]
    stats: StatsSnapshot,
    add_latency_ms: LatencyQuantiles,
    processing_latency_ms: LatencyQuantiles,
}

/// Error envelope: the queue error mapped onto an HTTP status.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::QueueNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::QueueAlreadyExist(_)
            | QueueError::InvalidQueueId(_)
            | QueueError::InvalidConfig(_)
            | QueueError::TooManyAtOnce => StatusCode::BAD_REQUEST,
            QueueError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::Store(_) | QueueError::Codec(_) | QueueError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

async fn list_queues(State(controller): State<Arc<Controller>>) -> Json<ListResult<QueueView>> {
    let queues = controller
        .get_all_queues()
        .await
        .iter()
        .map(|m| QueueView::from_manager(m))
        .collect();
    Json(ListResult::new("/api/queue".to_string(), queues))
}

async fn create_queue(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<CreateQueueRequest>,
) -> Result<(StatusCode, Json<QueueView>), ApiError> {
    let manager = controller
        .add_queue(&request.queue_id, request.config)
        .await?;
    Ok((StatusCode::CREATED, Json(QueueView::from_manager(&manager))))
}

async fn get_queue(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<Json<QueueView>, ApiError> {
    let manager = controller.get_queue(&queue_id).await?;
    Ok(Json(QueueView::from_manager(&manager)))
}

async fn delete_queue(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    controller.remove_queue(&queue_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tasks(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<Json<ListResult<Task>>, ApiError> {
    let manager = controller.get_queue(&queue_id).await?;
    let tasks = manager.get_tasks()?;
    Ok(Json(ListResult::new(
        format!("/api/queue/{queue_id}/task"),
        tasks,
    )))
}

async fn list_scheduled(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<Json<ListResult<Task>>, ApiError> {
    let manager = controller.get_queue(&queue_id).await?;
    let tasks = manager.get_scheduled_tasks()?;
    Ok(Json(ListResult::new(
        format!("/api/queue/{queue_id}/scheduled"),
        tasks,
    )))
}

async fn create_task(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if request.scheduled < 0 {
        return Err(ApiError::bad_request("scheduled must not be negative"));
    }
    if request.target.is_empty() {
        return Err(ApiError::bad_request("target must not be empty"));
    }
    let manager = controller.get_queue(&queue_id).await?;
    let task = manager.add_task(
        &request.target,
        request.payload.into_bytes(),
        request.scheduled,
    )?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn flush_tasks(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<Json<FlushResult>, ApiError> {
    let manager = controller.get_queue(&queue_id).await?;
    let removed = manager.flush()?;
    Ok(Json(FlushResult { removed }))
}

async fn get_stats(
    State(controller): State<Arc<Controller>>,
    Path(queue_id): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let manager = controller.get_queue(&queue_id).await?;
    Ok(Json(StatsResponse {
        object: "stats",
        stats: manager.stats(),
        add_latency_ms: manager.add_latency_quantiles(),
        processing_latency_ms: manager.processing_latency_quantiles(),
    }))
}

const METRICS: &[(&str, &str, &str, fn(&StatsSnapshot) -> i64)] = &[
    ("qdo_in_queue", "Tasks waiting in the queue.", "gauge", |s| {
        s.in_queue
    }),
    (
        "qdo_in_scheduled",
        "Tasks scheduled for a future instant.",
        "gauge",
        |s| s.in_scheduled,
    ),
    (
        "qdo_in_processing",
        "POSTs currently in flight.",
        "gauge",
        |s| s.in_processing,
    ),
    (
        "qdo_received_total",
        "Tasks accepted into the queue.",
        "counter",
        |s| s.total_received,
    ),
    (
        "qdo_processed_ok_total",
        "Tasks delivered successfully.",
        "counter",
        |s| s.total_processed_ok,
    ),
    (
        "qdo_processed_error_total",
        "Attempts that ended in an error.",
        "counter",
        |s| s.total_processed_error,
    ),
    (
        "qdo_rescheduled_total",
        "Retry insertions into the schedule line.",
        "counter",
        |s| s.total_processed_rescheduled,
    ),
    (
        "qdo_processing_time_ms_total",
        "Cumulative processing time in milliseconds.",
        "counter",
        |s| s.total_time,
    ),
    (
        "qdo_time_last_ok_seconds",
        "Unix time of the last successful delivery.",
        "gauge",
        |s| s.time_last_ok,
    ),
    (
        "qdo_store_errors_total",
        "Storage failures absorbed while degraded.",
        "counter",
        |s| s.store_errors,
    ),
];

async fn metrics(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    let queues = controller.get_all_queues().await;
    let snapshots: Vec<(String, StatsSnapshot)> = queues
        .iter()
        .map(|m| (m.id().to_string(), m.stats()))
        .collect();

    let mut body = String::new();
    for (name, help, kind, read) in METRICS {
        body.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n"));
        for (queue, snapshot) in &snapshots {
            body.push_str(&format!("{name}{{queue=\"{queue}\"}} {}\n", read(snapshot)));
        }
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
