//! Bounded reasoning/acting loop for one turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_common::{
    ConversationContext, HandlerDefinition, Message, MessageRole, Result, ToolCallRef,
};
use relay_llm::{
    ChatMessage, Completion, CompletionRequest, ProposedCall, ReasoningClient, ToolSchema,
};
use relay_mcp::{CapabilityInvoker, InvocationResult, ToolInvocation};

/// Bounds on a single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Maximum reasoning iterations before the turn is cut off.
    pub max_iterations: u32,
    /// Wall-clock budget for the whole turn, in milliseconds.
    pub deadline_ms: u64,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            deadline_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Reasoning,
    AwaitingToolResult,
    Done,
    Aborted,
}

/// How the turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    DidNotFinish { reason: String },
}

/// Everything a finished turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub reply: String,
    pub invocations: Vec<ToolInvocation>,
}

const CUTOFF_REPLY: &str =
    "I wasn't able to finish this request within the allowed budget. \
     The work done so far is recorded above; please retry or narrow the request.";

/// Drives one turn: ask the model, execute the tool calls it proposes,
/// feed the results back, repeat until a final answer or a bound is hit.
pub struct ExecutionLoop {
    reasoning: Arc<dyn ReasoningClient>,
    invoker: Arc<dyn CapabilityInvoker>,
    limits: LoopLimits,
}

impl ExecutionLoop {
    pub fn new(
        reasoning: Arc<dyn ReasoningClient>,
        invoker: Arc<dyn CapabilityInvoker>,
        limits: LoopLimits,
    ) -> Self {
        Self {
            reasoning,
            invoker,
            limits,
        }
    }

    /// Run the loop for one turn. The user message is already in the
    /// context; everything the turn produces is appended to it.
    ///
    /// A reasoning failure is the one hard error. Tool failures, bound
    /// overruns and cancellation all end the turn with a
    /// [`TurnStatus::DidNotFinish`] or get fed back as tool results.
    pub async fn run(
        &self,
        definition: &HandlerDefinition,
        context: &mut ConversationContext,
        tools: Vec<ToolSchema>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let deadline = Instant::now() + Duration::from_millis(self.limits.deadline_ms);
        let allowed: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let system_prompt = definition.render_instructions(&context.user_id, &rfc3339_now());

        let mut state = LoopState::Reasoning;
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut reply = String::new();
        let mut status = TurnStatus::Completed;

        for iteration in 0..=self.limits.max_iterations {
            debug!(thread = %context.thread_id, iteration, state = ?state, "loop step");

            if cancel.is_cancelled() {
                state = LoopState::Aborted;
                status = TurnStatus::DidNotFinish {
                    reason: "turn cancelled".to_string(),
                };
                break;
            }
            if iteration == self.limits.max_iterations {
                state = LoopState::Aborted;
                status = TurnStatus::DidNotFinish {
                    reason: format!("iteration bound of {} reached", self.limits.max_iterations),
                };
                break;
            }
            if Instant::now() >= deadline {
                state = LoopState::Aborted;
                status = TurnStatus::DidNotFinish {
                    reason: format!("deadline of {}ms exceeded", self.limits.deadline_ms),
                };
                break;
            }

            let request = CompletionRequest {
                system_prompt: Some(system_prompt.clone()),
                messages: history_to_chat(context),
                tools: tools.clone(),
                temperature: None,
                max_tokens: None,
            };

            // The one failure that aborts the turn outright. The call is
            // bounded by the remaining turn budget so a hung reasoning
            // endpoint cannot stall the thread past its deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let completion =
                match tokio::time::timeout(remaining, self.reasoning.complete(request)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        state = LoopState::Aborted;
                        status = TurnStatus::DidNotFinish {
                            reason: format!(
                                "deadline of {}ms exceeded",
                                self.limits.deadline_ms
                            ),
                        };
                        break;
                    }
                };

            match completion {
                Completion::Final(text) => {
                    context.push(Message::handler(text.clone()));
                    reply = text;
                    state = LoopState::Done;
                    break;
                }
                Completion::ToolCalls(calls) => {
                    state = LoopState::AwaitingToolResult;
                    debug!(
                        thread = %context.thread_id,
                        state = ?state,
                        calls = calls.len(),
                        "dispatching tool batch"
                    );
                    let batch = self.run_batch(&allowed, calls).await;

                    // A cancellation that lands mid-batch discards the
                    // batch: nothing from it reaches the thread history.
                    if cancel.is_cancelled() {
                        state = LoopState::Aborted;
                        status = TurnStatus::DidNotFinish {
                            reason: "turn cancelled".to_string(),
                        };
                        break;
                    }

                    for invocation in batch {
                        context.push(Message::tool_result(
                            invocation.result.as_text(),
                            ToolCallRef {
                                call_id: invocation.call_id.clone(),
                                qualified_name: invocation.qualified_name.clone(),
                                arguments: invocation.arguments.clone(),
                            },
                        ));
                        invocations.push(invocation);
                    }
                    state = LoopState::Reasoning;
                }
            }
        }

        if state == LoopState::Aborted {
            if let TurnStatus::DidNotFinish { ref reason } = status {
                warn!(thread = %context.thread_id, reason = %reason, "turn did not finish");
            }
            reply = CUTOFF_REPLY.to_string();
            context.push(Message::handler(reply.clone()));
        }

        Ok(TurnOutcome {
            status,
            reply,
            invocations,
        })
    }

    /// Execute one batch of proposed calls concurrently. Results come back
    /// in proposal order regardless of completion order.
    async fn run_batch(
        &self,
        allowed: &[&str],
        calls: Vec<ProposedCall>,
    ) -> Vec<ToolInvocation> {
        let futures = calls.into_iter().map(|call| async move {
            let result = if !allowed.contains(&call.qualified_name.as_str()) {
                InvocationResult::Failure {
                    reason: format!(
                        "capability {} is not available to this handler",
                        call.qualified_name
                    ),
                }
            } else {
                self.invoker
                    .invoke(&call.qualified_name, call.arguments.clone())
                    .await
            };

            if result.is_failure() {
                warn!(capability = %call.qualified_name, "tool invocation failed");
            }

            ToolInvocation {
                call_id: call.call_id,
                qualified_name: call.qualified_name,
                arguments: call.arguments,
                result,
            }
        });

        join_all(futures).await
    }
}

fn history_to_chat(context: &ConversationContext) -> Vec<ChatMessage> {
    context
        .history()
        .iter()
        .map(|msg| match msg.role {
            MessageRole::User => ChatMessage::user(msg.content.clone()),
            MessageRole::Handler => ChatMessage::assistant(msg.content.clone()),
            MessageRole::ToolResult => {
                let call = msg
                    .tool_call
                    .as_ref()
                    .map(|c| ProposedCall {
                        call_id: c.call_id.clone(),
                        qualified_name: c.qualified_name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .unwrap_or_else(|| ProposedCall {
                        call_id: String::new(),
                        qualified_name: String::new(),
                        arguments: serde_json::Value::Null,
                    });
                ChatMessage::tool(msg.content.clone(), call)
            }
        })
        .collect()
}

fn rfc3339_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
