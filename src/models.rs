use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::ChatSettings;

/// Message text sent when no user content accompanies a turn.
pub const REPLAY_SENTINEL: &str = "[REPLAY]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Backend agent that produced an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    Coordinator,
    Planner,
    Researcher,
    Coder,
    Reporter,
    Podcast,
    Document,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Coordinator => "coordinator",
            Agent::Planner => "planner",
            Agent::Researcher => "researcher",
            Agent::Coder => "coder",
            Agent::Reporter => "reporter",
            Agent::Podcast => "podcast",
            Agent::Document => "document",
        }
    }

    /// Agents whose output belongs to a research thread.
    pub fn is_research_activity(&self) -> bool {
        matches!(self, Agent::Coder | Agent::Researcher | Agent::Reporter)
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Interrupt,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "stop" => FinishReason::Stop,
            "interrupt" => FinishReason::Interrupt,
            "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other(s),
        }
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Stop => "stop".to_string(),
            FinishReason::Interrupt => "interrupt".to_string(),
            FinishReason::ToolCalls => "tool_calls".to_string(),
            FinishReason::Length => "length".to_string(),
            FinishReason::ContentFilter => "content_filter".to_string(),
            FinishReason::Other(s) => s,
        }
    }
}

/// Tool arguments: parsed once the accumulated fragments form valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum ToolCallArgs {
    Parsed(Value),
    Raw(String),
}

impl Default for ToolCallArgs {
    fn default() -> Self {
        ToolCallArgs::Raw(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: ToolCallArgs,
    /// Accumulated argument fragments as received.
    pub args_text: String,
    pub result: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: ToolCallArgs::default(),
            args_text: String::new(),
            result: None,
        }
    }

    pub fn push_args(&mut self, fragment: &str) {
        self.args_text.push_str(fragment);
        self.reparse_args();
    }

    fn reparse_args(&mut self) {
        if self.args_text.trim().is_empty() {
            return;
        }
        self.args = match serde_json::from_str::<Value>(&self.args_text) {
            Ok(value) => ToolCallArgs::Parsed(value),
            Err(_) => ToolCallArgs::Raw(self.args_text.clone()),
        };
    }
}

/// Feedback choice offered by an interrupting agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptOption {
    pub text: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub agent: Option<Agent>,
    pub content: String,
    pub content_chunks: Vec<String>,
    pub reasoning_content: Option<String>,
    pub reasoning_content_chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub options: Vec<InterruptOption>,
    pub is_streaming: bool,
    pub finish_reason: Option<FinishReason>,
    pub interrupt_feedback: Option<String>,
    pub error: Option<String>,
}

impl Message {
    /// A finished user message.
    pub fn user(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            role: MessageRole::User,
            agent: None,
            content_chunks: vec![content.clone()],
            content,
            reasoning_content: None,
            reasoning_content_chunks: Vec::new(),
            tool_calls: Vec::new(),
            options: Vec::new(),
            is_streaming: false,
            finish_reason: None,
            interrupt_feedback: None,
            error: None,
        }
    }

    /// An empty, streaming assistant message.
    pub fn assistant(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        agent: Option<Agent>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            role: MessageRole::Assistant,
            agent,
            content: String::new(),
            content_chunks: Vec::new(),
            reasoning_content: None,
            reasoning_content_chunks: Vec::new(),
            tool_calls: Vec::new(),
            options: Vec::new(),
            is_streaming: true,
            finish_reason: None,
            interrupt_feedback: None,
            error: None,
        }
    }

    pub fn is_agent(&self, agent: Agent) -> bool {
        self.agent == Some(agent)
    }

    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| call.id == tool_call_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Body of the streaming chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt_feedback: Option<String>,
    pub auto_accepted_plan: bool,
    pub enable_background_investigation: bool,
    pub max_plan_iterations: u32,
    pub max_step_num: u32,
    pub max_search_results: u32,
    pub mcp_settings: Value,
}

impl ChatRequest {
    pub fn new(
        thread_id: &str,
        content: Option<&str>,
        interrupt_feedback: Option<String>,
        settings: &ChatSettings,
    ) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: content.unwrap_or(REPLAY_SENTINEL).to_string(),
            }],
            thread_id: thread_id.to_string(),
            interrupt_feedback,
            auto_accepted_plan: settings.auto_accepted_plan,
            enable_background_investigation: settings.enable_background_investigation,
            max_plan_iterations: settings.max_plan_iterations,
            max_step_num: settings.max_step_num,
            max_search_results: settings.max_search_results,
            mcp_settings: settings.mcp_settings.clone(),
        }
    }
}
