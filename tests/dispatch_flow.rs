//! Integration tests for bulk dispatch: pacing, serialization, cancellation.

mod common;

use axum::http::StatusCode;
use common::TestApp;
use relayd::client::Payload;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn send_body(user_id: &str, message: &str, numbers: &[&str], delay_ms: u64) -> Value {
    json!({
        "userId": user_id,
        "message": message,
        "numbers": numbers,
        "delay": delay_ms,
    })
}

#[tokio::test(start_paused = true)]
async fn test_close_session_stops_inflight_job() {
    let app = Arc::new(TestApp::spawn());
    app.ready("alice").await;

    let job = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            app.post_json(
                "/send-messages",
                send_body("alice", "hi", &["1", "2", "3", "4", "5"], 1000),
            )
            .await
        })
    };

    while app.factory.sent("alice").len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let (status, body) = app
        .post_json("/close-session", json!({ "userId": "alice" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Session closed");

    let (status, body) = job.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Session lost during dispatch");
    assert_eq!(body["sent"], 2);
    assert_eq!(body["lost"], 3);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    for lost in &results[2..] {
        assert_eq!(lost["status"], "session_lost");
        assert_eq!(lost["attempts"], 0);
    }
    assert_eq!(app.factory.sent("alice").len(), 2);
}

#[tokio::test]
async fn test_unpaced_job_notices_disconnect() {
    let app = TestApp::spawn();
    app.ready("alice").await;
    app.factory.disconnect_after("alice", 2);

    let (status, body) = app
        .post_json(
            "/send-messages",
            send_body("alice", "hi", &["1", "2", "3", "4", "5"], 0),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["sent"], 2);
    assert_eq!(body["lost"], 3);
    assert_eq!(app.factory.sent("alice").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_dispatch_independently() {
    let app = Arc::new(TestApp::spawn());
    app.ready("alice").await;
    app.ready("bob").await;

    let start = Instant::now();
    let (a, b) = tokio::join!(
        app.post_json(
            "/send-messages",
            send_body("alice", "a", &["1", "2", "3"], 1000)
        ),
        app.post_json(
            "/send-messages",
            send_body("bob", "b", &["1", "2", "3"], 1000)
        ),
    );
    let elapsed = start.elapsed();

    assert_eq!(a.1["sent"], 3);
    assert_eq!(b.1["sent"], 3);
    // Two pauses each, running side by side.
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_jobs_for_one_session_do_not_interleave() {
    let app = Arc::new(TestApp::spawn());
    app.ready("alice").await;

    let start = Instant::now();
    let (first, second) = tokio::join!(
        app.post_json(
            "/send-messages",
            send_body("alice", "first", &["1", "2", "3"], 1000)
        ),
        app.post_json(
            "/send-messages",
            send_body("alice", "second", &["4", "5", "6"], 1000)
        ),
    );
    assert_eq!(first.1["sent"], 3);
    assert_eq!(second.1["sent"], 3);
    assert!(start.elapsed() >= Duration::from_secs(4));

    let texts: Vec<String> = app
        .factory
        .sent("alice")
        .into_iter()
        .map(|m| match m.payload {
            Payload::Text(text) => text,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(texts.len(), 6);
    // Whichever job won the lock, its three messages come as one block.
    assert!(texts[..3].iter().all(|t| t == &texts[0]));
    assert!(texts[3..].iter().all(|t| t == &texts[3]));
    assert_ne!(texts[0], texts[3]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_sends_time_out_and_fail() {
    let app = TestApp::spawn();
    app.ready("alice").await;
    app.factory.set_send_latency("alice", Duration::from_secs(60));

    let (status, body) = app
        .post_json("/send-messages", send_body("alice", "hi", &["1"], 0))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["failed"], 1);
    let result = &body["results"][0];
    assert_eq!(result["status"], "failed");
    assert_eq!(result["attempts"], 3);
    assert!(result["error"].as_str().unwrap().contains("timed out"));
    assert!(app.factory.sent("alice").is_empty());
}
