use std::collections::HashMap;

use serde::Deserialize;

use crate::models::{FinishReason, Message, ToolCall};

const UNTITLED: &str = "Untitled";

/// Snapshot of one conversation: messages in arrival order plus the
/// research groups derived from them.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub(crate) thread_id: String,
    pub(crate) responding: bool,
    pub(crate) message_ids: Vec<String>,
    pub(crate) messages: HashMap<String, Message>,
    pub(crate) research_ids: Vec<String>,
    pub(crate) research_plan_ids: HashMap<String, String>,
    pub(crate) research_report_ids: HashMap<String, String>,
    pub(crate) research_activity_ids: HashMap<String, Vec<String>>,
    pub(crate) ongoing_research_id: Option<String>,
    pub(crate) open_research_id: Option<String>,
    /// Most recently appended planner message.
    pub(crate) last_planner_id: Option<String>,
}

/// Read-only view of a research thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchGroup {
    pub research_id: String,
    pub plan_message_id: Option<String>,
    pub activity_message_ids: Vec<String>,
    pub report_message_id: Option<String>,
    pub ongoing: bool,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self { thread_id: thread_id.into(), ..Self::default() }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn is_responding(&self) -> bool {
        self.responding
    }

    pub fn message_ids(&self) -> &[String] {
        &self.message_ids
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> + '_ {
        self.message_ids.iter().filter_map(|id| self.messages.get(id))
    }

    pub fn research_ids(&self) -> &[String] {
        &self.research_ids
    }

    pub fn research_plan_id(&self, research_id: &str) -> Option<&str> {
        self.research_plan_ids.get(research_id).map(String::as_str)
    }

    pub fn research_report_id(&self, research_id: &str) -> Option<&str> {
        self.research_report_ids.get(research_id).map(String::as_str)
    }

    pub fn research_activity_ids(&self, research_id: &str) -> &[String] {
        self.research_activity_ids
            .get(research_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn ongoing_research_id(&self) -> Option<&str> {
        self.ongoing_research_id.as_deref()
    }

    pub fn open_research_id(&self) -> Option<&str> {
        self.open_research_id.as_deref()
    }

    pub fn research(&self, research_id: &str) -> Option<ResearchGroup> {
        if !self.research_ids.iter().any(|id| id == research_id) {
            return None;
        }
        Some(ResearchGroup {
            research_id: research_id.to_string(),
            plan_message_id: self.research_plan_id(research_id).map(str::to_string),
            activity_message_ids: self.research_activity_ids(research_id).to_vec(),
            report_message_id: self.research_report_id(research_id).map(str::to_string),
            ongoing: self.ongoing_research_id() == Some(research_id),
        })
    }

    pub fn research_plan_message(&self, research_id: &str) -> Option<&Message> {
        self.research_plan_id(research_id)
            .and_then(|id| self.message(id))
    }

    pub fn research_report_message(&self, research_id: &str) -> Option<&Message> {
        self.research_report_id(research_id)
            .and_then(|id| self.message(id))
    }

    /// Title of the research plan, `"Untitled"` when it cannot be read.
    pub fn research_title(&self, research_id: &str) -> String {
        #[derive(Deserialize)]
        struct Plan {
            title: Option<String>,
        }

        self.research_plan_message(research_id)
            .and_then(|plan| serde_json::from_str::<Plan>(strip_code_fence(&plan.content)).ok())
            .and_then(|plan| plan.title)
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// Newest message owning a tool call with this id.
    pub fn find_message_by_tool_call_id(&self, tool_call_id: &str) -> Option<&Message> {
        self.message_ids
            .iter()
            .rev()
            .filter_map(|id| self.messages.get(id))
            .find(|message| message.tool_call(tool_call_id).is_some())
    }

    /// The last message, when it is an agent waiting for feedback.
    pub fn last_interrupt_message(&self) -> Option<&Message> {
        if self.message_ids.len() < 2 {
            return None;
        }
        self.message_ids
            .last()
            .and_then(|id| self.messages.get(id))
            .filter(|message| message.finish_reason == Some(FinishReason::Interrupt))
    }

    /// The message the pending interrupt asks feedback about.
    pub fn last_feedback_message_id(&self) -> Option<&str> {
        self.last_interrupt_message()?;
        self.message_ids
            .get(self.message_ids.len() - 2)
            .map(String::as_str)
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.messages()
            .flat_map(|message| message.tool_calls.iter())
            .collect()
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
