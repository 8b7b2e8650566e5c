//! Control-surface API over a live listener: route wiring, status codes
//! and queue inspection.

mod helpers;

use helpers::{free_port, harness_with_log};
use lumen_sr::api::{self, AppContext};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const LOG: &[&str] = &[
    "Alpha - First [A | 01-01-2026 10:00:00]",
    "Beta - Second [B | 01-01-2026 11:00:00]",
];

async fn serve(lines: &[&str]) -> (String, helpers::Harness) {
    let h = harness_with_log(lines).await;
    let port = free_port().await;
    let ctx = AppContext {
        sequencer: Arc::clone(&h.sequencer),
        events: h.events.clone(),
    };
    tokio::spawn(async move {
        api::run(port, ctx, std::future::pending()).await.unwrap();
    });

    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{base}/health")).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    (base, h)
}

#[tokio::test]
async fn health_reports_service() {
    let (base, _h) = serve(&[]).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "lumen-sr");
}

#[tokio::test]
async fn queue_starts_empty() {
    let (base, _h) = serve(&[]).await;
    let body: Value = reqwest::get(format!("{base}/playback/queue"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["entries"].as_array().unwrap().len(), 0);
    assert!(body["cursor"].is_null());
}

#[tokio::test]
async fn enqueue_log_populates_queue() {
    let (base, _h) = serve(LOG).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/playback/enqueue-log"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    // Fire-and-forget; poll for the rebuild
    let mut entries = 0;
    for _ in 0..50 {
        let body: Value = client
            .get(format!("{base}/playback/queue"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        entries = body["entries"].as_array().unwrap().len();
        if entries == 2 {
            assert_eq!(body["entries"][0]["query"], "Beta - Second");
            assert_eq!(body["entries"][0]["current"], true);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn playback_verbs_are_accepted() {
    let (base, _h) = serve(LOG).await;
    let client = reqwest::Client::new();
    for verb in ["next", "previous", "stop"] {
        let resp = client
            .post(format!("{base}/playback/{verb}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED, "verb {verb}");
    }
}

#[tokio::test]
async fn play_at_validates_index() {
    let (base, _h) = serve(&[]).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/playback/play-at"))
        .json(&json!({ "index": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remove_validates_index() {
    let (base, _h) = serve(&[]).await;
    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("{base}/playback/queue/4"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_succeeds_when_idle() {
    let (base, _h) = serve(&[]).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/playback/queue/clear"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
