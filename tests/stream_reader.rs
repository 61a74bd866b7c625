mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use research_chat::config::ReconnectPolicy;
use research_chat::errors::AppError;
use research_chat::events::ChatEvent;
use research_chat::merge::merge_message;
use research_chat::models::ChatRequest;
use research_chat::settings::ChatSettings;
use research_chat::sse::EventStreamReader;

use common::{
    config_for, failing_sse_response, frame, hanging_sse_response, payload, spawn_backend,
    sse_response,
};

fn greeting() -> String {
    frame("message_chunk", &payload("m1", json!({ "agent": "coordinator", "content": "Hel" })))
        + &frame(
            "message_chunk",
            &payload("m1", json!({ "content": "lo", "finish_reason": "stop" })),
        )
}

fn reader(api_url: &str, policy: ReconnectPolicy, cancel: CancellationToken) -> EventStreamReader {
    let config = config_for(api_url);
    let request = ChatRequest::new("thread-1", Some("hi"), None, &ChatSettings::default());
    EventStreamReader::new(
        reqwest::Client::new(),
        config.service_url("chat/stream").unwrap(),
        &request,
        policy,
        cancel,
    )
    .unwrap()
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(5),
        idle_timeout: Some(Duration::from_secs(5)),
    }
}

async fn drain(reader: &mut EventStreamReader) -> Result<Vec<ChatEvent>, AppError> {
    let mut events = Vec::new();
    while let Some(raw) = reader.next_event().await? {
        events.push(ChatEvent::decode(&raw)?);
    }
    Ok(events)
}

#[tokio::test]
async fn two_chunks_merge_into_one_message() {
    let app = Router::new().route("/api/chat/stream", post(|| async { sse_response(greeting()) }));
    let api = spawn_backend(app).await;

    let mut reader = reader(&api, fast_policy(), CancellationToken::new());
    let events = drain(&mut reader).await.unwrap();
    assert_eq!(events.len(), 2);

    let message = events
        .iter()
        .fold(None, |message, event| Some(merge_message(message, event)))
        .unwrap();
    assert_eq!(message.content, "Hello");
    assert!(!message.is_streaming);
    assert!(reader.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn request_carries_stream_headers_and_body() {
    let seen: Arc<Mutex<Vec<(HeaderMap, Value)>>> = Arc::default();
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(
                |State(seen): State<Arc<Mutex<Vec<(HeaderMap, Value)>>>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push((headers, body));
                    sse_response(greeting())
                },
            ),
        )
        .with_state(seen.clone());
    let api = spawn_backend(app).await;

    let mut reader = reader(&api, fast_policy(), CancellationToken::new());
    drain(&mut reader).await.unwrap();

    let seen = seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(headers["accept"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(body["thread_id"], "thread-1");
    assert_eq!(body["messages"][0]["content"], "hi");
    assert_eq!(body["max_step_num"], 3);
}

#[tokio::test]
async fn reconnects_after_retryable_statuses() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    return StatusCode::SERVICE_UNAVAILABLE.into_response();
                }
                sse_response(greeting())
            }),
        )
        .with_state(hits.clone());
    let api = spawn_backend(app).await;

    let started = Instant::now();
    let mut reader = reader(&api, fast_policy(), CancellationToken::new());
    let events = drain(&mut reader).await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // 50ms before the second attempt, 75ms before the third.
    assert!(started.elapsed() >= Duration::from_millis(125));
}

#[tokio::test]
async fn non_retryable_status_fails_immediately() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND.into_response()
            }),
        )
        .with_state(hits.clone());
    let api = spawn_backend(app).await;

    let mut reader = reader(&api, fast_policy(), CancellationToken::new());
    let err = reader.next_event().await.unwrap_err();
    assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(reader.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_reconnects_name_the_attempt_count() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_GATEWAY.into_response()
            }),
        )
        .with_state(hits.clone());
    let api = spawn_backend(app).await;

    let policy = ReconnectPolicy { max_attempts: 2, ..fast_policy() };
    let mut reader = reader(&api, policy, CancellationToken::new());
    let err = reader.next_event().await.unwrap_err();

    assert!(matches!(err, AppError::ReconnectExhausted { attempts: 2, .. }));
    assert!(err.to_string().contains("after 2 attempts"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancel_mid_stream_stops_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                hanging_sse_response(vec![frame(
                    "message_chunk",
                    &payload("m1", json!({ "content": "partial" })),
                )])
            }),
        )
        .with_state(hits.clone());
    let api = spawn_backend(app).await;

    let cancel = CancellationToken::new();
    let mut reader = reader(&api, fast_policy(), cancel.clone());
    assert!(reader.next_event().await.unwrap().is_some());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = reader.next_event().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(reader.next_event().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_discards_events_already_buffered() {
    let app = Router::new().route(
        "/api/chat/stream",
        post(|| async {
            let body: String = ["a", "b", "c"]
                .iter()
                .map(|content| frame("message_chunk", &payload("m1", json!({ "content": content }))))
                .collect();
            hanging_sse_response(vec![body])
        }),
    );
    let api = spawn_backend(app).await;

    let cancel = CancellationToken::new();
    let mut reader = reader(&api, fast_policy(), cancel.clone());
    let first = ChatEvent::decode(&reader.next_event().await.unwrap().unwrap()).unwrap();
    assert!(matches!(first, ChatEvent::MessageChunk(ref chunk) if chunk.content.as_deref() == Some("a")));

    cancel.cancel();
    let err = reader.next_event().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(reader.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn dropped_streams_reconnect_and_keep_partial_events() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/chat/stream",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                let hit = hits.fetch_add(1, Ordering::SeqCst);
                let chunk = frame(
                    "message_chunk",
                    &payload("m1", json!({ "content": format!("part{hit} ") })),
                );
                if hit < 3 {
                    failing_sse_response(vec![chunk], Duration::from_millis(100))
                } else {
                    let last = frame(
                        "message_chunk",
                        &payload("m1", json!({ "content": "done", "finish_reason": "stop" })),
                    );
                    sse_response(chunk + &last)
                }
            }),
        )
        .with_state(hits.clone());
    let api = spawn_backend(app).await;

    // A successful connect resets the attempt budget, so one attempt covers each drop.
    let policy = ReconnectPolicy { max_attempts: 1, ..fast_policy() };
    let mut reader = reader(&api, policy, CancellationToken::new());
    let events = drain(&mut reader).await.unwrap();

    let message = events
        .iter()
        .fold(None, |message, event| Some(merge_message(message, event)))
        .unwrap();
    assert_eq!(message.content, "part0 part1 part2 part3 done");
    assert!(!message.is_streaming);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn silent_server_trips_idle_timeout() {
    let app = Router::new().route(
        "/api/chat/stream",
        post(|| async {
            let first = frame("message_chunk", &payload("m1", json!({ "content": "a" })));
            hanging_sse_response(vec![first])
        }),
    );
    let api = spawn_backend(app).await;

    let policy = ReconnectPolicy {
        max_attempts: 0,
        idle_timeout: Some(Duration::from_millis(100)),
        ..fast_policy()
    };
    let mut reader = reader(&api, policy, CancellationToken::new());
    assert!(reader.next_event().await.unwrap().is_some());

    let err = reader.next_event().await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
}

#[tokio::test]
async fn unterminated_last_event_is_flushed() {
    let app = Router::new().route(
        "/api/chat/stream",
        post(|| async {
            let body = greeting();
            sse_response(body.trim_end().to_string())
        }),
    );
    let api = spawn_backend(app).await;

    let mut reader = reader(&api, fast_policy(), CancellationToken::new());
    let events = drain(&mut reader).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
}
