use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One chat message in model wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Tool` messages to link back to the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// On `Tool` messages, the call being answered. Backends that need the
    /// preceding assistant tool_calls entry rebuild it from this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ProposedCall>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn tool(content: impl Into<String>, call: ProposedCall) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call.call_id.clone()),
            tool_call: Some(call),
        }
    }
}

/// A capability advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Qualified capability name, `provider::tool`.
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call the model wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCall {
    pub call_id: String,
    pub qualified_name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Empty when the caller wants plain text only.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// What the model produced: either a final answer or a batch of tool
/// calls, in the order the model proposed them.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Final(String),
    ToolCalls(Vec<ProposedCall>),
}

/// Abstraction over the reasoning backend.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    fn model_name(&self) -> &str;
}

#[async_trait]
impl ReasoningClient for Box<dyn ReasoningClient> {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        (**self).complete(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
