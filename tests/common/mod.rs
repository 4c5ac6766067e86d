//! Integration test common infrastructure.
//!
//! Builds the full HTTP stack in-process on top of the loopback client
//! backend and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use relayd::client::ClientEvent;
use relayd::client::loopback::LoopbackFactory;
use relayd::config::Config;
use relayd::http::{self, AppState};
use relayd::session::{SessionManager, SessionSettings};
use relayd::state::SessionState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Multipart boundary used by [`Multipart`].
const BOUNDARY: &str = "relayd-test-boundary";

/// Configuration suited to tests: no pacing, small upload limit.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sessions.max_sessions = 4;
    config.sessions.close_timeout_secs = 1;
    config.messages.default_delay_ms = 0;
    config.messages.max_retries = 2;
    config.messages.attempt_timeout_secs = 5;
    config.messages.max_recipients = 5;
    config.uploads.max_file_size = 64;
    config
}

/// In-process daemon.
pub struct TestApp {
    pub factory: LoopbackFactory,
    pub manager: Arc<SessionManager>,
    router: Router,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let factory = LoopbackFactory::manual();
        let manager = Arc::new(SessionManager::new(
            SessionSettings::from(&config.sessions),
            Arc::new(factory.clone()),
        ));
        let state = Arc::new(AppState::new(
            Arc::clone(&manager),
            config.messages.clone(),
            config.uploads.clone(),
        ));
        Self {
            factory,
            manager,
            router: http::router(state),
        }
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Response body is not JSON")
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("Failed to build request"),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("Failed to build request"),
        )
        .await
    }

    pub async fn post_multipart(&self, uri: &str, form: Multipart) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(form.finish()))
                .expect("Failed to build request"),
        )
        .await
    }

    /// Start a session for `user_id` and pair it.
    pub async fn ready(&self, user_id: &str) {
        let (status, _) = self
            .post_json("/start-session", serde_json::json!({ "userId": user_id }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(self.factory.emit(user_id, ClientEvent::Ready).await);
        self.wait_for(user_id, SessionState::Ready).await;
    }

    /// Poll until `user_id` reaches `state`.
    pub async fn wait_for(&self, user_id: &str, state: SessionState) {
        for _ in 0..400 {
            if self.manager.status(user_id).ok() == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "{user_id} never reached {state}, last {:?}",
            self.manager.status(user_id)
        );
    }
}

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct Multipart {
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, mime: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}
