//! Folds stream events into conversation messages.
//!
//! Every function here is pure: it takes ownership of the current message
//! value and returns the next one, so the store can swap it in atomically.

use tracing::trace;

use crate::events::{ChatEvent, Interrupt, MessageChunk, ToolCallChunk, ToolCallResult, ToolCalls};
use crate::models::{FinishReason, Message, ToolCall, ToolCallArgs};

/// A fresh streaming message built from an event's metadata.
pub fn message_from_event(event: &ChatEvent, interrupt_feedback: Option<String>) -> Message {
    let meta = event.meta();
    let mut message = Message::assistant(&meta.id, &meta.thread_id, meta.agent);
    message.role = meta.role;
    message.interrupt_feedback = interrupt_feedback;
    message
}

/// Merges `event` into `existing`, creating the message when absent.
///
/// Once a message stopped streaming only tool results still land on it,
/// so replaying a terminal event is a no-op.
pub fn merge_message(existing: Option<Message>, event: &ChatEvent) -> Message {
    let mut message = existing.unwrap_or_else(|| message_from_event(event, None));

    if !message.is_streaming {
        if let ChatEvent::ToolCallResult(result) = event {
            apply_tool_result(&mut message, result);
        }
        return message;
    }

    match event {
        ChatEvent::MessageChunk(chunk) => apply_text(&mut message, chunk),
        ChatEvent::ToolCalls(calls) => apply_tool_calls(&mut message, calls),
        ChatEvent::ToolCallChunks(chunks) => {
            for chunk in &chunks.tool_call_chunks {
                apply_tool_call_chunk(&mut message, chunk);
            }
        }
        ChatEvent::ToolCallResult(result) => apply_tool_result(&mut message, result),
        ChatEvent::Interrupt(interrupt) => apply_interrupt(&mut message, interrupt),
    }

    if let Some(reason) = &event.meta().finish_reason {
        finish(&mut message, reason.clone());
    }
    message
}

fn apply_text(message: &mut Message, chunk: &MessageChunk) {
    if let Some(content) = chunk.content.as_deref().filter(|c| !c.is_empty()) {
        message.content.push_str(content);
        message.content_chunks.push(content.to_string());
    }
    if let Some(reasoning) = chunk.reasoning_content.as_deref().filter(|c| !c.is_empty()) {
        message
            .reasoning_content
            .get_or_insert_with(String::new)
            .push_str(reasoning);
        message.reasoning_content_chunks.push(reasoning.to_string());
    }
}

fn apply_tool_calls(message: &mut Message, calls: &ToolCalls) {
    for start in calls.tool_calls.iter().filter(|s| !s.name.is_empty()) {
        if message.tool_call(&start.id).is_some() {
            continue;
        }
        let mut call = ToolCall::new(&start.id, &start.name);
        if !start.args.is_null() {
            call.args = ToolCallArgs::Parsed(start.args.clone());
        }
        message.tool_calls.push(call);
    }
    for chunk in &calls.tool_call_chunks {
        apply_tool_call_chunk(message, chunk);
    }
}

fn apply_tool_call_chunk(message: &mut Message, chunk: &ToolCallChunk) {
    let fragment = chunk.args.as_deref().unwrap_or_default();

    if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
        if let Some(call) = message.tool_calls.iter_mut().find(|call| call.id == id) {
            call.push_args(fragment);
        } else if let Some(name) = chunk.name.as_deref().filter(|n| !n.is_empty()) {
            let mut call = ToolCall::new(id, name);
            call.push_args(fragment);
            message.tool_calls.push(call);
        } else {
            trace!(tool_call_id = id, "Dropping args chunk for unknown tool call");
        }
        return;
    }

    let position = chunk
        .index
        .filter(|index| *index < message.tool_calls.len())
        .or_else(|| message.tool_calls.len().checked_sub(1));
    match position {
        Some(index) => message.tool_calls[index].push_args(fragment),
        None => trace!(message_id = %message.id, "Args chunk before any tool call"),
    }
}

fn apply_tool_result(message: &mut Message, result: &ToolCallResult) {
    if let Some(call) = message
        .tool_calls
        .iter_mut()
        .find(|call| call.id == result.tool_call_id)
    {
        if call.result.is_none() {
            call.result = Some(result.content.clone());
        }
    }
}

fn apply_interrupt(message: &mut Message, interrupt: &Interrupt) {
    if let Some(content) = interrupt.content.as_deref().filter(|c| !c.is_empty()) {
        message.content.push_str(content);
        message.content_chunks.push(content.to_string());
    }
    message.options = interrupt.options.clone();
    let reason = interrupt
        .meta
        .finish_reason
        .clone()
        .unwrap_or(FinishReason::Interrupt);
    finish(message, reason);
}

fn finish(message: &mut Message, reason: FinishReason) {
    message.is_streaming = false;
    message.finish_reason = Some(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::StreamEvent;
    use serde_json::json;

    fn event(name: &str, data: serde_json::Value) -> ChatEvent {
        let mut data = data;
        let object = data.as_object_mut().unwrap();
        object.entry("thread_id").or_insert(json!("t1"));
        object.entry("role").or_insert(json!("assistant"));
        ChatEvent::decode(&StreamEvent { event: name.into(), data: data.to_string() }).unwrap()
    }

    fn fold(events: &[ChatEvent]) -> Message {
        events
            .iter()
            .fold(None, |message, event| Some(merge_message(message, event)))
            .unwrap()
    }

    #[test]
    fn content_is_concatenation_of_chunks() {
        let pieces = ["The ", "quick ", "", "brown ", "fox"];
        let events: Vec<_> = pieces
            .iter()
            .map(|p| event("message_chunk", json!({ "id": "m1", "agent": "reporter", "content": p })))
            .collect();
        let message = fold(&events);
        assert_eq!(message.content, "The quick brown fox");
        assert_eq!(message.content, message.content_chunks.concat());
        assert!(message.is_streaming);
    }

    #[test]
    fn reasoning_has_its_own_channel() {
        let message = fold(&[
            event("message_chunk", json!({ "id": "m1", "reasoning_content": "think" })),
            event("message_chunk", json!({ "id": "m1", "reasoning_content": "ing", "content": "ok" })),
        ]);
        assert_eq!(message.reasoning_content.as_deref(), Some("thinking"));
        assert_eq!(message.content, "ok");
    }

    #[test]
    fn finish_is_idempotent() {
        let finish = event(
            "message_chunk",
            json!({ "id": "m1", "content": "done", "finish_reason": "stop" }),
        );
        let once = fold(&[finish.clone()]);
        let twice = merge_message(Some(once.clone()), &finish);
        assert_eq!(once, twice);
        assert!(!twice.is_streaming);
        assert_eq!(twice.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn tool_call_args_accumulate_until_parseable() {
        let message = fold(&[
            event(
                "tool_calls",
                json!({
                    "id": "m1",
                    "agent": "researcher",
                    "tool_calls": [{ "id": "call_1", "name": "web_search", "args": {} }],
                    "tool_call_chunks": [{ "id": "call_1", "name": "web_search", "args": "", "index": 0 }]
                }),
            ),
            event(
                "tool_call_chunks",
                json!({ "id": "m1", "tool_call_chunks": [{ "args": "{\"query\":", "index": 0 }] }),
            ),
        ]);
        let call = &message.tool_calls[0];
        assert_eq!(call.args, ToolCallArgs::Raw("{\"query\":".into()));

        let message = merge_message(
            Some(message),
            &event(
                "tool_call_chunks",
                json!({ "id": "m1", "tool_call_chunks": [{ "args": " \"rust\"}" }] }),
            ),
        );
        let call = &message.tool_calls[0];
        assert_eq!(call.args, ToolCallArgs::Parsed(json!({ "query": "rust" })));
        assert_eq!(call.args_text, "{\"query\": \"rust\"}");
    }

    #[test]
    fn tool_result_lands_after_message_finished() {
        let message = fold(&[
            event(
                "tool_calls",
                json!({
                    "id": "m1",
                    "tool_calls": [{ "id": "call_1", "name": "crawl", "args": { "url": "x" } }],
                    "finish_reason": "tool_calls"
                }),
            ),
        ]);
        assert!(!message.is_streaming);

        let result = event(
            "tool_call_result",
            json!({ "id": "m2", "tool_call_id": "call_1", "content": "page" }),
        );
        let message = merge_message(Some(message), &result);
        assert_eq!(message.tool_calls[0].result.as_deref(), Some("page"));
        assert!(!message.is_streaming);
        assert_eq!(message.id, "m1");
    }

    #[test]
    fn interrupt_records_options_and_stops() {
        let message = fold(&[event(
            "interrupt",
            json!({
                "id": "m3",
                "content": "Please review the plan.",
                "finish_reason": "interrupt",
                "options": [
                    { "text": "Edit plan", "value": "edit_plan" },
                    { "text": "Start research", "value": "accepted" }
                ]
            }),
        )]);
        assert!(!message.is_streaming);
        assert_eq!(message.finish_reason, Some(FinishReason::Interrupt));
        assert_eq!(message.options.len(), 2);
        assert_eq!(message.content, "Please review the plan.");
    }

    #[test]
    fn content_is_frozen_after_finish() {
        let message = fold(&[
            event("message_chunk", json!({ "id": "m1", "content": "a", "finish_reason": "stop" })),
            event("message_chunk", json!({ "id": "m1", "content": "b" })),
        ]);
        assert_eq!(message.content, "a");
    }
}
