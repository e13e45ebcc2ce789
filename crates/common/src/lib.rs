//! Common types shared across OpsRelay crates.
//!
//! This crate provides the foundational vocabulary that the classifier,
//! capability aggregator and execution loop all speak: conversation
//! messages, per-thread context, handler definitions and the error
//! taxonomy.

pub mod context;
pub mod error;
pub mod handler;
pub mod message;

pub use context::ConversationContext;
pub use error::{RelayError, Result};
pub use handler::{HandlerDefinition, HandlerId};
pub use message::{Message, MessageRole, ToolCallRef};
