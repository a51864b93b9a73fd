//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use dramabox_core::{ClientRegistry, Config, DramaboxClient};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const BOOTSTRAP_PATH: &str = "/drama-box/ap001/bootstrap";
pub const TOKEN_VALUE: &str = "tok-1";

/// Config pointed at `server` with millisecond backoff
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = server.uri();
    config.retry.max_attempts = 3;
    config.retry.min_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.retry.jitter = false;
    config.transport.timeout_ms = 2_000;
    config
}

/// Successful upstream envelope around `data`
pub fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "status": 0,
        "message": "ok",
        "data": data,
    }))
}

pub async fn mount_bootstrap(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(BOOTSTRAP_PATH))
        .respond_with(envelope(json!({ "user": { "token": TOKEN_VALUE } })))
        .mount(server)
        .await;
}

/// Registry against `server`, token endpoint already mocked
pub async fn registry(server: &MockServer) -> ClientRegistry {
    mount_bootstrap(server).await;
    ClientRegistry::new(test_config(server)).unwrap()
}

pub async fn client(server: &MockServer) -> Arc<DramaboxClient> {
    registry(server).await.get("in").unwrap()
}

/// Requests received on `request_path`
pub async fn hits(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .count()
}
