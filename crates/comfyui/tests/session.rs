//! Integration tests for `ComfyUISession` against an in-process stub engine.
//!
//! The stub accepts `POST /prompt`, answers with sequential prompt ids and
//! pushes a scripted event sequence to every connected `/ws` client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;
use vton_comfyui::reconnect::ReconnectConfig;
use vton_comfyui::session::{ComfyUISession, ComfyUISessionError, SessionConfig};

// ---------------------------------------------------------------------------
// Stub engine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    /// Run the prompt and report completion.
    Complete,
    /// Reject every submission with 400.
    Reject,
    /// Queue the prompt but never report anything.
    Silent,
    /// Report an execution error.
    Error,
    /// Never answer `POST /prompt`.
    Hang,
}

#[derive(Clone)]
enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Clone)]
struct Stub {
    behaviour: Behaviour,
    frames: broadcast::Sender<Frame>,
    submitted: Arc<AtomicUsize>,
    client_ids: Arc<Mutex<Vec<String>>>,
}

#[derive(Deserialize)]
struct WsParams {
    #[serde(rename = "clientId")]
    client_id: String,
}

fn executing(prompt_id: &str, node: Option<&str>) -> Frame {
    Frame::Text(
        serde_json::json!({"type": "executing", "data": {"prompt_id": prompt_id, "node": node}})
            .to_string(),
    )
}

fn image(payload: &[u8]) -> Frame {
    let mut data = vec![0, 0, 0, 1, 0, 0, 0, 2];
    data.extend_from_slice(payload);
    Frame::Binary(data)
}

fn script(behaviour: Behaviour, prompt_id: &str) -> Vec<Frame> {
    match behaviour {
        Behaviour::Complete => vec![
            image(b"stray"),
            Frame::Text(
                serde_json::json!({"type": "execution_start", "data": {"prompt_id": prompt_id}})
                    .to_string(),
            ),
            executing(prompt_id, Some("4")),
            image(b"preview"),
            executing(prompt_id, Some("save")),
            image(b"RESULT"),
            executing("someone-else", None),
            Frame::Text("not json".to_string()),
            executing(prompt_id, None),
        ],
        Behaviour::Error => vec![
            executing(prompt_id, Some("4")),
            Frame::Text(
                serde_json::json!({
                    "type": "execution_error",
                    "data": {
                        "prompt_id": prompt_id,
                        "node_id": "4",
                        "exception_message": "CUDA out of memory",
                        "exception_type": "RuntimeError",
                    }
                })
                .to_string(),
            ),
        ],
        Behaviour::Reject | Behaviour::Silent | Behaviour::Hang => Vec::new(),
    }
}

async fn submit_prompt(State(stub): State<Stub>) -> Response {
    if stub.behaviour == Behaviour::Reject {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": {"type": "prompt_no_outputs"}})),
        )
            .into_response();
    }
    if stub.behaviour == Behaviour::Hang {
        std::future::pending::<()>().await;
    }

    let n = stub.submitted.fetch_add(1, Ordering::SeqCst) + 1;
    let prompt_id = format!("P{n}");

    // Events go out before the HTTP response so the waiter starts late.
    for frame in script(stub.behaviour, &prompt_id) {
        let _ = stub.frames.send(frame);
    }

    Json(serde_json::json!({"prompt_id": prompt_id, "number": n, "node_errors": {}})).into_response()
}

async fn ws_handler(
    State(stub): State<Stub>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    stub.client_ids.lock().unwrap().push(params.client_id);
    let rx = stub.frames.subscribe();
    ws.on_upgrade(move |socket| forward_frames(socket, rx))
}

async fn forward_frames(mut socket: WebSocket, mut rx: broadcast::Receiver<Frame>) {
    let status = serde_json::json!({
        "type": "status",
        "data": {"status": {"exec_info": {"queue_remaining": 0}}, "sid": "stub"}
    });
    if socket.send(Message::Text(status.to_string().into())).await.is_err() {
        return;
    }
    while let Ok(frame) = rx.recv().await {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        if socket.send(msg).await.is_err() {
            return;
        }
    }
}

async fn spawn_stub(behaviour: Behaviour) -> (Stub, String) {
    let (frames, _) = broadcast::channel(64);
    let stub = Stub {
        behaviour,
        frames,
        submitted: Arc::new(AtomicUsize::new(0)),
        client_ids: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/prompt", post(submit_prompt))
        .route("/ws", get(ws_handler))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (stub, format!("127.0.0.1:{}", addr.port()))
}

fn session_for(addr: &str) -> ComfyUISession {
    let config = SessionConfig {
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_attempts: 1,
            ..Default::default()
        },
        output_nodes: vec!["save".to_string()],
        ..Default::default()
    };
    ComfyUISession::new(format!("http://{addr}"), format!("ws://{addr}"), config)
}

// ---------------------------------------------------------------------------
// Test: a submitted prompt completes with outputs from allow-listed nodes only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_completes_with_output_node_frames() {
    let (stub, addr) = spawn_stub(Behaviour::Complete).await;
    let session = session_for(&addr);

    let prompt_id = session.submit(&serde_json::json!({})).await.unwrap();
    let done = session
        .await_completion(&prompt_id, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(done.prompt_id, "P1");
    assert_eq!(done.outputs.len(), 1);
    assert_eq!(done.outputs[0].node, "save");
    assert_eq!(done.outputs[0].data, b"RESULT");
    assert_eq!(
        stub.client_ids.lock().unwrap().as_slice(),
        [session.client_id().to_string()]
    );

    session.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: concurrent prompts share one channel and each sees its own result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_prompts_share_one_channel() {
    let (stub, addr) = spawn_stub(Behaviour::Complete).await;
    let session = Arc::new(session_for(&addr));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            let prompt_id = session.submit(&serde_json::json!({})).await?;
            session
                .await_completion(&prompt_id, Duration::from_secs(5))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let done = handle.await.unwrap().unwrap();
        assert_eq!(done.outputs.len(), 1);
        ids.push(done.prompt_id);
    }
    ids.sort();

    assert_eq!(ids, ["P1", "P2", "P3"]);
    assert_eq!(stub.client_ids.lock().unwrap().len(), 1);

    session.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: a 4xx from /prompt is reported as a rejection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_is_reported() {
    let (_stub, addr) = spawn_stub(Behaviour::Reject).await;
    let session = session_for(&addr);

    let result = session.submit(&serde_json::json!({})).await;

    match result {
        Err(ComfyUISessionError::SubmissionRejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("prompt_no_outputs"));
        }
        other => panic!("Expected SubmissionRejected, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: an execution error fails the prompt with the engine's message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_error_fails_prompt() {
    let (_stub, addr) = spawn_stub(Behaviour::Error).await;
    let session = session_for(&addr);

    let prompt_id = session.submit(&serde_json::json!({})).await.unwrap();
    let result = session
        .await_completion(&prompt_id, Duration::from_secs(5))
        .await;

    match result {
        Err(ComfyUISessionError::ExecutionFailed { reason, .. }) => {
            assert!(reason.contains("CUDA out of memory"));
        }
        other => panic!("Expected ExecutionFailed, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: a prompt the engine never finishes times out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_engine_times_out() {
    let (_stub, addr) = spawn_stub(Behaviour::Silent).await;
    let session = session_for(&addr);

    let prompt_id = session.submit(&serde_json::json!({})).await.unwrap();
    let result = session
        .await_completion(&prompt_id, Duration::from_millis(200))
        .await;

    assert!(matches!(result, Err(ComfyUISessionError::Timeout { .. })));
}

// ---------------------------------------------------------------------------
// Test: a submission the engine never answers is bounded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hung_submission_times_out() {
    let (_stub, addr) = spawn_stub(Behaviour::Hang).await;
    let config = SessionConfig {
        submit_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let session = ComfyUISession::new(format!("http://{addr}"), format!("ws://{addr}"), config);

    let result = session.submit(&serde_json::json!({})).await;

    assert!(matches!(result, Err(ComfyUISessionError::SubmitTimeout(_))));
    assert!(session.is_connected());

    session.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: disconnect fails in-flight prompts and is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_fails_in_flight_prompts() {
    let (_stub, addr) = spawn_stub(Behaviour::Silent).await;
    let session = Arc::new(session_for(&addr));

    let prompt_id = session.submit(&serde_json::json!({})).await.unwrap();
    assert!(session.is_connected());

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .await_completion(&prompt_id, Duration::from_secs(5))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    session.disconnect().await;
    session.disconnect().await;

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(ComfyUISessionError::ExecutionFailed { .. })));
    assert!(!session.is_connected());
    assert!(matches!(
        session.submit(&serde_json::json!({})).await,
        Err(ComfyUISessionError::Closed)
    ));
}

// ---------------------------------------------------------------------------
// Test: connect is idempotent while the channel is open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_is_idempotent() {
    let (stub, addr) = spawn_stub(Behaviour::Complete).await;
    let session = session_for(&addr);

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    assert!(session.is_connected());
    assert_eq!(stub.client_ids.lock().unwrap().len(), 1);

    session.disconnect().await;
}
