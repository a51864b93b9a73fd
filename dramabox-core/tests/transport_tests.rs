//! Retry and timeout behaviour of the transport

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dramabox_core::{Error, HttpMethod, Transport};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use common::test_config;

async fn no_headers() -> dramabox_core::Result<HeaderMap> {
    Ok(HeaderMap::new())
}

#[tokio::test]
async fn test_always_503_fails_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(3)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server)).unwrap();
    let err = transport
        .request_with_retry(HttpMethod::Get, "/flaky", &json!({}), Duration::from_secs(2), no_headers)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::Upstream {
            status: 503,
            body: "busy".to_string()
        }
    );
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server)).unwrap();
    let err = transport
        .request_with_retry(HttpMethod::Get, "/missing", &json!({}), Duration::from_secs(2), no_headers)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Upstream { status: 404, .. }));
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server)).unwrap();
    let response = transport
        .request_with_retry(HttpMethod::Post, "/recover", &json!({}), Duration::from_secs(2), no_headers)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(common::hits(&server, "/recover").await, 3);
}

#[tokio::test]
async fn test_headers_rebuilt_for_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/attempts"))
        .and(header("x-attempt", "3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/attempts"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server)).unwrap();
    let calls = AtomicU32::new(0);
    let response = transport
        .request_with_retry(HttpMethod::Get, "/attempts", &json!({}), Duration::from_secs(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let mut headers = HeaderMap::new();
                headers.insert("x-attempt", HeaderValue::from(n));
                Ok(headers)
            }
        })
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_header_factory_error_aborts() {
    let server = MockServer::start().await;
    let transport = Transport::new(&test_config(&server)).unwrap();

    let err = transport
        .request_with_retry(HttpMethod::Get, "/never", &json!({}), Duration::from_secs(2), || async {
            Err(Error::auth("no token"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_attempts = 1;
    let transport = Transport::new(&config).unwrap();

    let err = transport
        .request(HttpMethod::Get, "/slow", &json!({}), HeaderMap::new(), Duration::from_millis(50))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::Timeout {
            path: "/slow".to_string(),
            timeout_ms: 50
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_get_sends_query_and_post_sends_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("bookId", "42"))
        .and(query_param("index", "7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/body"))
        .and(body_partial_json(json!({ "pageNo": 2 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server)).unwrap();
    let timeout = Duration::from_secs(2);
    transport
        .request(HttpMethod::Get, "/query", &json!({ "bookId": "42", "index": 7 }), HeaderMap::new(), timeout)
        .await
        .unwrap();
    transport
        .request(HttpMethod::Post, "/body", &json!({ "pageNo": 2 }), HeaderMap::new(), timeout)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_connection_refused_is_network_error_after_max_attempts() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = dramabox_core::Config::default();
    config.upstream.base_url = format!("http://127.0.0.1:{port}");
    config.retry.max_attempts = 3;
    config.retry.min_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.retry.jitter = false;

    let transport = Transport::new(&config).unwrap();
    let attempts = AtomicU32::new(0);
    let err = transport
        .request_with_retry(HttpMethod::Get, "/closed", &json!({}), Duration::from_secs(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            no_headers()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
