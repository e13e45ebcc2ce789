use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_common::{RelayError, Result};

use crate::client::{
    Completion, CompletionRequest, ProposedCall, ReasoningClient, Role, ToolSchema,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

// OpenAI function names may not contain "::", so qualified capability
// names cross the wire with a "__" separator and are mapped back on read.
fn to_wire_name(qualified: &str) -> String {
    qualified.replace("::", "__")
}

fn from_wire_name(wire: &str) -> String {
    match wire.split_once("__") {
        Some((provider, tool)) => format!("{provider}::{tool}"),
        None => wire.to_string(),
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireCalledFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireCalledFunction {
    name: String,
    /// JSON-encoded argument object, per the chat completions format.
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn role_to_string(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    // The wire format requires every tool message to follow an assistant
    // message carrying the matching tool_calls entry. Our history stores
    // tool results flat, so consecutive runs of tool messages get a
    // reconstructed assistant message inserted ahead of them.
    fn build_messages(request: &CompletionRequest) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            });
        }

        let mut pending_calls: Vec<WireToolCall> = Vec::new();
        let mut pending_results: Vec<WireMessage> = Vec::new();

        for msg in &request.messages {
            if msg.role == Role::Tool {
                let call_id = msg.tool_call_id.clone().unwrap_or_default();
                let (name, arguments) = match &msg.tool_call {
                    Some(call) => (
                        to_wire_name(&call.qualified_name),
                        call.arguments.to_string(),
                    ),
                    None => (String::new(), "{}".to_string()),
                };
                pending_calls.push(WireToolCall {
                    id: call_id.clone(),
                    r#type: "function".to_string(),
                    function: WireCalledFunction { name, arguments },
                });
                pending_results.push(WireMessage {
                    role: "tool".to_string(),
                    content: Some(msg.content.clone()),
                    tool_call_id: Some(call_id),
                    tool_calls: Vec::new(),
                });
                continue;
            }

            Self::flush_tool_run(&mut messages, &mut pending_calls, &mut pending_results);
            messages.push(WireMessage {
                role: Self::role_to_string(msg.role).to_string(),
                content: Some(msg.content.clone()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            });
        }
        Self::flush_tool_run(&mut messages, &mut pending_calls, &mut pending_results);

        messages
    }

    fn flush_tool_run(
        messages: &mut Vec<WireMessage>,
        calls: &mut Vec<WireToolCall>,
        results: &mut Vec<WireMessage>,
    ) {
        if calls.is_empty() {
            return;
        }
        messages.push(WireMessage {
            role: "assistant".to_string(),
            content: None,
            tool_call_id: None,
            tool_calls: std::mem::take(calls),
        });
        messages.append(results);
    }

    fn build_tools(tools: &[ToolSchema]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function",
                function: WireFunction {
                    name: to_wire_name(&t.name),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request_body(&self, request: &CompletionRequest) -> WireRequest {
        let tool_choice = if request.tools.is_empty() {
            None
        } else {
            Some("auto")
        };
        WireRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            tools: Self::build_tools(&request.tools),
            tool_choice,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn parse_completion(message: WireMessage) -> Result<Completion> {
        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|call| {
                    let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                    ProposedCall {
                        call_id: call.id,
                        qualified_name: from_wire_name(&call.function.name),
                        arguments,
                    }
                })
                .collect();
            return Ok(Completion::ToolCalls(calls));
        }

        Ok(Completion::Final(message.content.unwrap_or_default()))
    }
}

#[async_trait]
impl ReasoningClient for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| RelayError::Reasoning(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RelayError::Reasoning(format!(
                "API error {status}: {body_text}"
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Reasoning(format!("failed to parse response: {e}")))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Reasoning("no choices in response".to_string()))?;

        Self::parse_completion(choice.message)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
