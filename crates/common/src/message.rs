use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message in a conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human asking for something.
    User,
    /// The handler's own reply text.
    Handler,
    /// The outcome of a single tool invocation, fed back into the loop.
    ToolResult,
}

/// Link from a tool-result message back to the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub call_id: String,
    /// Fully qualified capability name, `provider::tool`.
    pub qualified_name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Present only on `ToolResult` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRef>,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn handler(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Handler, content, None)
    }

    pub fn tool_result(content: impl Into<String>, call: ToolCallRef) -> Self {
        Self::new(MessageRole::ToolResult, content, Some(call))
    }

    fn new(role: MessageRole, content: impl Into<String>, tool_call: Option<ToolCallRef>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_call,
            timestamp: now_millis(),
        }
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
