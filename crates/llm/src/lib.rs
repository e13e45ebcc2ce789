//! Reasoning model clients.
//!
//! The coordinator talks to any OpenAI-compatible chat completions
//! endpoint through the [`ReasoningClient`] trait. A retry wrapper handles
//! transient upstream failures.

pub mod client;
pub mod config;
pub mod openai;
pub mod retry;

pub use client::{
    ChatMessage, Completion, CompletionRequest, ProposedCall, ReasoningClient, Role, ToolSchema,
};
pub use config::{build_reasoning_client, LlmConfig};
pub use openai::OpenAiCompatClient;
pub use retry::{RetryConfig, RetryingClient};
