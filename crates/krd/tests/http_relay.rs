#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! `HttpRelay` against a fake queue relay served over loopback HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use kr_core::config::RelayConfig;
use krd::transport::{HttpRelay, Transport, TransportError};

#[derive(Default)]
struct FakeRelay {
    queues: HashMap<String, VecDeque<String>>,
    creates: Vec<String>,
    deleted: Vec<String>,
    /// Answer every send with this status instead of queueing.
    forced: Option<StatusCode>,
}

type Shared = Arc<Mutex<FakeRelay>>;

async fn create(State(relay): State<Shared>, Path(name): Path<String>) -> StatusCode {
    let mut relay = relay.lock().await;
    relay.creates.push(name.clone());
    relay.queues.entry(name).or_default();
    StatusCode::OK
}

async fn send(
    State(relay): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut relay = relay.lock().await;
    if let Some(status) = relay.forced {
        return status;
    }
    let Some(queue) = relay.queues.get_mut(&name) else {
        return StatusCode::NOT_FOUND;
    };
    queue.push_back(body["body"].as_str().unwrap().to_string());
    StatusCode::OK
}

async fn receive(
    State(relay): State<Shared>,
    Path(name): Path<String>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut relay = relay.lock().await;
    let Some(queue) = relay.queues.get_mut(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    };
    let max = usize::try_from(request["max_messages"].as_u64().unwrap()).unwrap();
    let messages: Vec<Value> = queue
        .drain(..max.min(queue.len()))
        .enumerate()
        .map(|(i, body)| json!({"body": body, "receipt": format!("{name}#{i}")}))
        .collect();
    (StatusCode::OK, Json(json!({ "messages": messages })))
}

async fn delete(State(relay): State<Shared>, Json(request): Json<Value>) -> StatusCode {
    let mut relay = relay.lock().await;
    for receipt in request["receipts"].as_array().unwrap() {
        relay.deleted.push(receipt.as_str().unwrap().to_string());
    }
    StatusCode::OK
}

async fn serve_fake() -> (String, Shared) {
    let state: Shared = Arc::default();
    let app = Router::new()
        .route("/queues/{name}", put(create))
        .route("/queues/{name}/messages", post(send))
        .route("/queues/{name}/receive", post(receive))
        .route("/queues/{name}/delete", post(delete))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), state)
}

fn relay_config() -> RelayConfig {
    RelayConfig {
        receive_wait_secs: 0,
        max_messages: 10,
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn send_to_missing_queue_creates_it_then_delivers() {
    let (url, state) = serve_fake().await;
    let relay = HttpRelay::new(&url, &relay_config()).unwrap();

    relay.send("ABC", "Zmlyc3Q=").await.unwrap();
    relay.send("ABC", "c2Vjb25k").await.unwrap();
    assert_eq!(state.lock().await.creates, vec!["ABC".to_string()]);

    let bodies = relay.receive("ABC").await.unwrap();
    assert_eq!(bodies, vec!["Zmlyc3Q=".to_string(), "c2Vjb25k".to_string()]);
    assert_eq!(
        state.lock().await.deleted,
        vec!["ABC#0".to_string(), "ABC#1".to_string()]
    );

    assert!(relay.receive("ABC").await.unwrap().is_empty());
}

#[tokio::test]
async fn receive_on_missing_queue_creates_it() {
    let (url, state) = serve_fake().await;
    let relay = HttpRelay::new(&url, &relay_config()).unwrap();

    assert!(relay.receive("ABC-responder").await.unwrap().is_empty());
    assert!(state.lock().await.queues.contains_key("ABC-responder"));
}

#[tokio::test]
async fn client_errors_are_fatal_and_server_errors_transient() {
    let (url, state) = serve_fake().await;
    let relay = HttpRelay::new(&url, &relay_config()).unwrap();
    relay.create_queue("ABC").await.unwrap();

    state.lock().await.forced = Some(StatusCode::FORBIDDEN);
    assert!(matches!(
        relay.send("ABC", "eA==").await,
        Err(TransportError::Fatal(_))
    ));

    state.lock().await.forced = Some(StatusCode::SERVICE_UNAVAILABLE);
    assert!(matches!(
        relay.send("ABC", "eA==").await,
        Err(TransportError::Transient(_))
    ));
}

#[tokio::test]
async fn unreachable_relay_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let relay = HttpRelay::new(&format!("http://{addr}"), &relay_config()).unwrap();
    let err = relay.receive("ABC").await.unwrap_err();
    assert!(err.is_transient());
}
