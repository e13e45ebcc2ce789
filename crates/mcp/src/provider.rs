use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_common::Result;

/// Provider reachability, updated after every discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Unknown,
    Up,
    Down,
}

impl Liveness {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Liveness::Up,
            2 => Liveness::Down,
            _ => Liveness::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Liveness::Unknown => 0,
            Liveness::Up => 1,
            Liveness::Down => 2,
        }
    }
}

/// A registered capability provider plus its current liveness.
///
/// Liveness is a plain atomic with last-writer-wins semantics; discovery
/// passes may overlap and the freshest observation stands.
pub struct Provider {
    pub id: String,
    pub client: Arc<dyn ProviderClient>,
    liveness: AtomicU8,
}

impl Provider {
    pub fn new(id: impl Into<String>, client: Arc<dyn ProviderClient>) -> Self {
        Self {
            id: id.into(),
            client,
            liveness: AtomicU8::new(Liveness::Unknown.as_u8()),
        }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::Relaxed))
    }

    pub fn set_liveness(&self, liveness: Liveness) {
        self.liveness.store(liveness.as_u8(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("liveness", &self.liveness())
            .finish()
    }
}

/// A tool as reported by a provider, before namespacing.
#[derive(Debug, Clone)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Transport-level view of one provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider_id(&self) -> &str;

    /// List the tools this provider currently exposes.
    async fn list_capabilities(&self) -> Result<Vec<ToolListing>>;

    /// Invoke one tool by its unqualified name.
    async fn invoke(&self, tool_name: &str, arguments: serde_json::Value)
        -> Result<serde_json::Value>;
}

/// Outcome of one tool invocation. Failures are data, not errors; the
/// execution loop feeds them back to the model as tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Success { payload: serde_json::Value },
    Failure { reason: String },
}

impl InvocationResult {
    pub fn as_text(&self) -> String {
        match self {
            InvocationResult::Success { payload } => match payload {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            InvocationResult::Failure { reason } => format!("error: {reason}"),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, InvocationResult::Failure { .. })
    }
}

/// One completed invocation, recorded on the turn outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub qualified_name: String,
    pub arguments: serde_json::Value,
    pub result: InvocationResult,
}

/// Dispatch surface the execution loop sees. Invocation is infallible at
/// the type level: every problem becomes an `InvocationResult::Failure`.
#[async_trait]
pub trait CapabilityInvoker: Send + Sync {
    async fn invoke(&self, qualified_name: &str, arguments: serde_json::Value)
        -> InvocationResult;
}
