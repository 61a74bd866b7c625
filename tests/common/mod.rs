#![allow(dead_code)]

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};

use research_chat::config::ClientConfig;
use research_chat::sse::StreamEvent;

/// Serves `app` on an ephemeral port and returns the API base url.
pub async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/")
}

pub fn config_for(api_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(api_url).unwrap();
    config.reconnect.base_delay = Duration::from_millis(50);
    config.reconnect.connect_timeout = Duration::from_secs(5);
    config.turn_retry.delay = Duration::from_millis(10);
    config
}

/// Payload with the fields every event carries.
pub fn payload(id: &str, fields: Value) -> Value {
    let mut data = json!({ "id": id, "thread_id": "thread-1", "role": "assistant" });
    if let (Some(target), Some(extra)) = (data.as_object_mut(), fields.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    data
}

pub fn frame(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn raw_event(event: &str, data: Value) -> StreamEvent {
    StreamEvent { event: event.to_string(), data: data.to_string() }
}

pub fn sse_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

/// Sends `frames` and then keeps the connection open without data.
pub fn hanging_sse_response(frames: Vec<String>) -> Response {
    let stream = futures_util::stream::iter(frames.into_iter().map(Ok::<_, Infallible>))
        .chain(futures_util::stream::pending());
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Sends `frames`, waits `delay`, then aborts the body mid-stream.
pub fn failing_sse_response(frames: Vec<String>, delay: Duration) -> Response {
    let stream = futures_util::stream::iter(frames.into_iter().map(Ok::<_, std::io::Error>))
        .chain(futures_util::stream::once(async move {
            tokio::time::sleep(delay).await;
            Err(std::io::Error::other("connection dropped"))
        }));
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}
