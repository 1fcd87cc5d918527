//! Admin API round trips
//!
//! Serves the real router over a real controller and drives it with an
//! HTTP client: queue CRUD, task submission, stats, and the metrics
//! text endpoint.

mod common;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::*;
use serde_json::{json, Value};

async fn spawn_api(harness: &Harness) -> String {
    let app = qdo_core::http::router(harness.controller.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn queue_and_task_lifecycle_over_http() {
    let harness = start_harness().await;
    let api = spawn_api(&harness).await;
    let (target, mut requests) = spawn_target(TargetMode::Ok).await;
    let client = reqwest::Client::new();

    // Create a queue.
    let response = client
        .post(format!("{api}/api/queue"))
        .json(&json!({
            "queue_id": "api",
            "max_concurrent": 2,
            "max_rate": 0,
            "task_timeout": 1,
            "task_max_tries": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let queue: Value = response.json().await.unwrap();
    assert_eq!(queue["id"], "api");
    assert_eq!(queue["state"], "running");

    // Duplicate ids and malformed ids are rejected.
    let duplicate = client
        .post(format!("{api}/api/queue"))
        .json(&json!({
            "queue_id": "API",
            "max_concurrent": 2,
            "max_rate": 0,
            "task_timeout": 1,
            "task_max_tries": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 400);

    // Listing shows it.
    let list: Value = client
        .get(format!("{api}/api/queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["object"], "list");
    assert_eq!(list["count"], 1);

    // Submit a task and watch it arrive.
    let response = client
        .post(format!("{api}/api/queue/api/task"))
        .json(&json!({ "target": target.url, "payload": "{\"v\":\"12345\"}" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["id"].as_str().unwrap().len(), 32);

    let request = recv_request(&mut requests, Duration::from_secs(5), "api delivery").await;
    assert_eq!(request.body, b"{\"v\":\"12345\"}");

    // Stats settle to one successful delivery.
    let mut ok = 0;
    for _ in 0..50 {
        let stats: Value = client
            .get(format!("{api}/api/queue/api/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ok = stats["total_processed_ok"].as_i64().unwrap();
        if ok == 1 {
            assert_eq!(stats["object"], "stats");
            assert_eq!(stats["in_queue"].as_i64().unwrap(), 0);
            assert!(stats["add_latency_ms"]["samples"].as_u64().unwrap() >= 1);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(ok, 1);

    // Metrics text carries the same counter.
    let metrics = client
        .get(format!("{api}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("# TYPE qdo_processed_ok_total counter"));
    assert!(metrics.contains("qdo_processed_ok_total{queue=\"api\"} 1"));

    harness.controller.stop().await;
}

#[tokio::test]
async fn scheduled_listing_and_flush_over_http() {
    let harness = start_harness().await;
    let api = spawn_api(&harness).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{api}/api/queue"))
        .json(&json!({
            "queue_id": "batch",
            "max_concurrent": 1,
            "max_rate": 0,
            "task_timeout": 1,
            "task_max_tries": 1,
        }))
        .send()
        .await
        .unwrap();

    let scheduled = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
        + 3600;
    let response = client
        .post(format!("{api}/api/queue/batch/task"))
        .json(&json!({
            "target": "http://localhost:9999/",
            "payload": "{}",
            "scheduled": scheduled,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let listed: Value = client
        .get(format!("{api}/api/queue/batch/scheduled"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);

    // Negative schedules are rejected.
    let bad = client
        .post(format!("{api}/api/queue/batch/task"))
        .json(&json!({ "target": "http://localhost:9999/", "scheduled": -5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    // Flush drops the backlog.
    let flushed: Value = client
        .delete(format!("{api}/api/queue/batch/task"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(flushed["removed"], 1);

    let listed: Value = client
        .get(format!("{api}/api/queue/batch/scheduled"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 0);

    // Remove the queue; it is gone afterwards.
    let deleted = client
        .delete(format!("{api}/api/queue/batch"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    let missing = client
        .get(format!("{api}/api/queue/batch"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    // Task operations on unknown queues are 404 as well.
    let missing = client
        .post(format!("{api}/api/queue/batch/task"))
        .json(&json!({ "target": "http://localhost:9999/" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    harness.controller.stop().await;
}
