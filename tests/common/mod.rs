//! Shared fixtures for the end-to-end dispatch tests
//!
//! Provides throwaway target servers with scripted behavior (echo,
//! fixed error status, slow success) that record every request they
//! receive, plus helpers to stand up a controller over a temporary
//! store.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::mpsc;

use qdo_core::{Controller, QueueConfig, SledStore};

/// Scripted behavior of a test target.
#[derive(Debug, Clone, Copy)]
pub enum TargetMode {
    /// Respond 200 immediately.
    Ok,
    /// Respond with a fixed status immediately.
    Status(u16),
    /// Hold the request open for the duration, then respond 200.
    SlowOk(Duration),
}

/// One request observed by a test target.
pub struct RecordedRequest {
    pub at: Instant,
    /// Seconds since the unix epoch at arrival.
    pub at_unix: f64,
    pub body: Vec<u8>,
}

pub struct TargetServer {
    pub url: String,
    state: Arc<TargetState>,
}

impl TargetServer {
    /// Highest number of requests that were open at the same time.
    pub fn max_in_flight(&self) -> i64 {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

struct TargetState {
    mode: TargetMode,
    tx: mpsc::UnboundedSender<RecordedRequest>,
    in_flight: AtomicI64,
    max_in_flight: AtomicI64,
}

/// Bind a target server on an ephemeral port. Requests it receives are
/// pushed onto the returned channel in arrival order.
pub async fn spawn_target(
    mode: TargetMode,
) -> (TargetServer, mpsc::UnboundedReceiver<RecordedRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(TargetState {
        mode,
        tx,
        in_flight: AtomicI64::new(0),
        max_in_flight: AtomicI64::new(0),
    });

    let app = Router::new().route("/", post(handle)).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (
        TargetServer {
            url: format!("http://{addr}/"),
            state,
        },
        rx,
    )
}

async fn handle(State(state): State<Arc<TargetState>>, body: Bytes) -> StatusCode {
    let open = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(open, Ordering::SeqCst);

    let at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    let _ = state.tx.send(RecordedRequest {
        at: Instant::now(),
        at_unix,
        body: body.to_vec(),
    });

    let status = match state.mode {
        TargetMode::Ok => StatusCode::OK,
        TargetMode::Status(code) => StatusCode::from_u16(code).unwrap(),
        TargetMode::SlowOk(delay) => {
            tokio::time::sleep(delay).await;
            StatusCode::OK
        }
    };

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    status
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub dir: tempfile::TempDir,
}

/// Controller over a fresh temporary store.
pub async fn start_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let controller = start_controller(&dir.path().join("db")).await;
    Harness { controller, dir }
}

/// Controller over an existing (or new) store directory; used by the
/// restart scenarios.
pub async fn start_controller(path: &Path) -> Arc<Controller> {
    let store = Arc::new(SledStore::open(path).unwrap());
    Controller::start(store).await.unwrap()
}

pub fn queue_config(
    max_concurrent: u32,
    max_rate: u32,
    task_timeout: u32,
    task_max_tries: u32,
) -> QueueConfig {
    QueueConfig {
        max_concurrent,
        max_rate,
        task_timeout,
        task_max_tries,
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Receive the next recorded request or panic after the timeout.
pub async fn recv_request(
    rx: &mut mpsc::UnboundedReceiver<RecordedRequest>,
    timeout: Duration,
    what: &str,
) -> RecordedRequest {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("target channel closed")
}
