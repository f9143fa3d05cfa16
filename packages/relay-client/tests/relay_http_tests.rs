//! Exercises the client against an in-process axum relay.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::StreamExt;
use relay_client::{AckRequest, AckStatus, ActionRequest, RelayClient, RelayError};
use serde_json::Value;

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn record(State(state): State<Recorded>, Json(body): Json<Value>) -> StatusCode {
    state.bodies.lock().unwrap().push(body);
    StatusCode::OK
}

async fn reject() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn stream() -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let frames = vec![
        r#"{"event":"connected"}"#,
        r#"{"type":"command","requestId":"r-1","action":"start_camera","device":"device1"}"#,
        r#"{"type":"command","requestId":"r-2","action":"stop_camera","device":"device2"}"#,
    ];
    Sse::new(futures::stream::iter(
        frames
            .into_iter()
            .map(|data| Ok(Event::default().data(data))),
    ))
}

async fn spawn_relay() -> (SocketAddr, Recorded) {
    let state = Recorded::default();
    let app = Router::new()
        .route("/api/camera", post(record))
        .route("/api/ack", post(record))
        .route("/api/down", post(reject))
        .route("/api/stream", get(stream))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn action_body_reaches_webhook() {
    let (addr, state) = spawn_relay().await;
    let client = RelayClient::new().unwrap();

    client
        .post_action(
            &format!("http://{}/api/camera", addr),
            &ActionRequest {
                action: "start_camera".into(),
                device: "device1".into(),
            },
        )
        .await
        .unwrap();

    let bodies = state.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["action"], "start_camera");
    assert_eq!(bodies[0]["device"], "device1");
}

#[tokio::test]
async fn ack_uses_wire_field_names() {
    let (addr, state) = spawn_relay().await;
    let client = RelayClient::new().unwrap();

    client
        .post_ack(
            &format!("http://{}/api/ack", addr),
            &AckRequest {
                request_id: "r-9".into(),
                device_id: "device1".into(),
                status: AckStatus::Executed,
                message: "camera started".into(),
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();

    let bodies = state.bodies.lock().unwrap();
    assert_eq!(bodies[0]["requestId"], "r-9");
    assert_eq!(bodies[0]["status"], "executed");
}

#[tokio::test]
async fn non_success_status_is_an_api_error() {
    let (addr, _state) = spawn_relay().await;
    let client = RelayClient::new().unwrap();

    let err = client
        .post_action(
            &format!("http://{}/api/down", addr),
            &ActionRequest {
                action: "stop_camera".into(),
                device: "device1".into(),
            },
        )
        .await
        .unwrap_err();

    match err {
        RelayError::Api { status, .. } => assert_eq!(status, 503),
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RelayClient::new().unwrap();
    let err = client
        .open_command_stream(&format!("http://{}/api/stream", addr))
        .await
        .err()
        .unwrap();
    assert!(err.is_connection());
}

#[tokio::test]
async fn command_stream_yields_frames_until_server_closes() {
    let (addr, _state) = spawn_relay().await;
    let client = RelayClient::new().unwrap();

    let stream = client
        .open_command_stream(&format!("http://{}/api/stream", addr))
        .await
        .unwrap();
    let frames: Vec<_> = stream.collect().await;

    let names: Vec<_> = frames
        .iter()
        .map(|f| f.as_ref().unwrap().name().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["connected", "start_camera", "stop_camera"]);
    assert_eq!(
        frames[1].as_ref().unwrap().request_id.as_deref(),
        Some("r-1")
    );
}
