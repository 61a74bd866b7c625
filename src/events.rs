//! Typed view of the backend's stream events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::models::{Agent, FinishReason, InterruptOption, MessageRole};
use crate::sse::StreamEvent;

/// Fields shared by every event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub agent: Option<Agent>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStart {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCalls {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub tool_calls: Vec<ToolCallStart>,
    #[serde(default)]
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunks {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub tool_call_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub options: Vec<InterruptOption>,
}

/// Closed set of events the merge engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageChunk(MessageChunk),
    ToolCalls(ToolCalls),
    ToolCallChunks(ToolCallChunks),
    ToolCallResult(ToolCallResult),
    Interrupt(Interrupt),
}

impl ChatEvent {
    /// Strictly decodes a framed event; unknown names and payloads missing
    /// required fields are errors.
    pub fn decode(raw: &StreamEvent) -> Result<Self, AppError> {
        match raw.event.as_str() {
            "message_chunk" => Ok(ChatEvent::MessageChunk(payload(raw)?)),
            "tool_calls" => Ok(ChatEvent::ToolCalls(payload(raw)?)),
            "tool_call_chunks" => Ok(ChatEvent::ToolCallChunks(payload(raw)?)),
            "tool_call_result" => Ok(ChatEvent::ToolCallResult(payload(raw)?)),
            "interrupt" => Ok(ChatEvent::Interrupt(payload(raw)?)),
            other => Err(AppError::UnknownEvent { event: other.to_string() }),
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            ChatEvent::MessageChunk(e) => &e.meta,
            ChatEvent::ToolCalls(e) => &e.meta,
            ChatEvent::ToolCallChunks(e) => &e.meta,
            ChatEvent::ToolCallResult(e) => &e.meta,
            ChatEvent::Interrupt(e) => &e.meta,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.meta().id
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageChunk(_) => "message_chunk",
            ChatEvent::ToolCalls(_) => "tool_calls",
            ChatEvent::ToolCallChunks(_) => "tool_call_chunks",
            ChatEvent::ToolCallResult(_) => "tool_call_result",
            ChatEvent::Interrupt(_) => "interrupt",
        }
    }

    /// Whether this event ends its message's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Interrupt(_)) || self.meta().finish_reason.is_some()
    }
}

fn payload<T: DeserializeOwned>(raw: &StreamEvent) -> Result<T, AppError> {
    serde_json::from_str(&raw.data).map_err(|source| AppError::MalformedEvent {
        event: raw.event.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event: &str, data: &str) -> StreamEvent {
        StreamEvent { event: event.into(), data: data.into() }
    }

    #[test]
    fn decodes_message_chunk_with_finish_reason() {
        let event = ChatEvent::decode(&raw(
            "message_chunk",
            r#"{"id":"m1","thread_id":"t","role":"assistant","agent":"planner","content":"Hi","finish_reason":"stop"}"#,
        ))
        .unwrap();
        let ChatEvent::MessageChunk(chunk) = &event else {
            panic!("expected message chunk, got {event:?}");
        };
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert_eq!(chunk.meta.agent, Some(Agent::Planner));
        assert!(event.is_terminal());
    }

    #[test]
    fn decodes_tool_call_result() {
        let event = ChatEvent::decode(&raw(
            "tool_call_result",
            r#"{"id":"m9","thread_id":"t","role":"assistant","agent":"researcher","tool_call_id":"call_1","content":"[]"}"#,
        ))
        .unwrap();
        assert_eq!(event.name(), "tool_call_result");
        assert_eq!(event.message_id(), "m9");
        assert!(!event.is_terminal());
    }

    #[test]
    fn unknown_event_names_are_rejected() {
        let err = ChatEvent::decode(&raw("heartbeat", "{}")).unwrap_err();
        assert!(matches!(err, AppError::UnknownEvent { ref event } if event == "heartbeat"));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = ChatEvent::decode(&raw("message_chunk", r#"{"content":"x"}"#)).unwrap_err();
        assert!(err.is_protocol());
        let err = ChatEvent::decode(&raw("tool_call_result", r#"{"id":"m","thread_id":"t","role":"assistant"}"#))
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedEvent { .. }));
    }

    #[test]
    fn unknown_agent_is_rejected() {
        let err = ChatEvent::decode(&raw(
            "message_chunk",
            r#"{"id":"m","thread_id":"t","role":"assistant","agent":"astrologer"}"#,
        ))
        .unwrap_err();
        assert!(err.is_protocol());
    }
}
