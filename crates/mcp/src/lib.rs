//! Capability aggregation over remote MCP providers.
//!
//! Each provider is an external MCP server (spawned child process or
//! streamable HTTP endpoint). The aggregator discovers every provider's
//! tools concurrently, merges them into a single namespaced capability
//! set, and dispatches invocations back to the owning provider.

pub mod aggregator;
pub mod client;
pub mod descriptor;
pub mod provider;
pub mod registry;

pub use aggregator::{CapabilityAggregator, DiscoveryReport, ProviderOutcome};
pub use client::{McpProviderClient, ProviderTransport};
pub use descriptor::{qualify, split_qualified, CapabilityDescriptor};
pub use provider::{
    CapabilityInvoker, InvocationResult, Liveness, Provider, ProviderClient, ToolInvocation,
    ToolListing,
};
pub use registry::{CapabilityRegistry, CapabilitySet};
