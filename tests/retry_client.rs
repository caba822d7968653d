//! Retrying client against a local HTTP server

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use backup_relay::RelayError;
use backup_relay::http::RetryPolicy;
use common::{fast_client, serve};

/// Server that answers `status` for the first `failures` hits, then 200
async fn flaky_server(failures: usize, status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = (hits.clone(), failures, status);
    let base = serve(move |_| {
        Router::new()
            .route(
                "/resource",
                get(
                    |State((hits, failures, status)): State<(Arc<AtomicUsize>, usize, StatusCode)>| async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < failures {
                            (status, "try again")
                        } else {
                            (StatusCode::OK, "ok")
                        }
                    },
                ),
            )
            .with_state(state)
    })
    .await;
    (format!("{}/resource", base), hits)
}

#[tokio::test]
async fn recovers_after_transient_server_errors() {
    let (url, hits) = flaky_server(2, StatusCode::INTERNAL_SERVER_ERROR).await;
    let client = fast_client(3);

    let request = client.client().get(&url).build().unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    let (url, hits) = flaky_server(usize::MAX, StatusCode::SERVICE_UNAVAILABLE).await;
    let client = fast_client(2);

    let request = client.client().get(&url).build().unwrap();
    let error = client.execute(request).await.unwrap_err();

    match error {
        RelayError::ServerStatus {
            url: target,
            status,
            retries,
            body,
        } => {
            assert_eq!(target, url);
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(retries, 2);
            assert_eq!(body, "try again");
        }
        other => panic!("expected server status error, got {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let (url, hits) = flaky_server(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR).await;
    let client = fast_client(0);

    let request = client.client().get(&url).build().unwrap();
    let error = client.execute(request).await.unwrap_err();

    assert!(matches!(error, RelayError::ServerStatus { retries: 0, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn waits_between_attempts() {
    let (url, hits) = flaky_server(2, StatusCode::BAD_GATEWAY).await;
    let client = fast_client(5);
    let policy = RetryPolicy {
        interval: Duration::from_millis(50),
        max_retries: 5,
    };

    let started = Instant::now();
    let request = client.client().get(&url).build().unwrap();
    client.execute_with(request, policy).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, hits) = flaky_server(usize::MAX, StatusCode::NOT_FOUND).await;
    let client = fast_client(6);

    let request = client.client().get(&url).build().unwrap();
    let error = client.execute(request).await.unwrap_err();

    assert!(matches!(
        error,
        RelayError::ClientStatus {
            status: StatusCode::NOT_FOUND,
            ref body,
            ..
        } if body == "try again"
    ));
    assert!(error.to_string().contains(&url));
    assert!(error.to_string().ends_with(": try again"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unexpected_status_is_not_retried() {
    let (url, hits) = flaky_server(usize::MAX, StatusCode::NOT_MODIFIED).await;
    let client = fast_client(6);

    let request = client.client().get(&url).build().unwrap();
    let error = client.execute(request).await.unwrap_err();

    assert!(matches!(error, RelayError::UnexpectedStatus { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_errors_are_not_retried() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = fast_client(6);
    let policy = RetryPolicy {
        interval: Duration::from_secs(5),
        max_retries: 6,
    };
    let url = format!("http://{}/resource", addr);
    let request = client.client().get(&url).build().unwrap();

    let started = Instant::now();
    let error = client.execute_with(request, policy).await.unwrap_err();

    assert!(matches!(error, RelayError::Transport { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn resends_the_same_request_body() {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let state = bodies.clone();
    let base = serve(move |_| {
        Router::new()
            .route(
                "/upload",
                axum::routing::post(
                    |State(bodies): State<Arc<Mutex<Vec<String>>>>, body: String| async move {
                        let mut seen = bodies.lock().unwrap();
                        seen.push(body);
                        if seen.len() == 1 {
                            StatusCode::INTERNAL_SERVER_ERROR
                        } else {
                            StatusCode::CREATED
                        }
                    },
                ),
            )
            .with_state(state)
    })
    .await;

    let client = fast_client(2);
    let request = client
        .client()
        .post(format!("{}/upload", base))
        .body("payload bytes")
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        *bodies.lock().unwrap(),
        vec!["payload bytes".to_string(), "payload bytes".to_string()]
    );
}
