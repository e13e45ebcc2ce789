//! Turn coordination: routing, capability binding and the execution loop.
//!
//! A turn arrives with a thread id and a user message. The classifier picks
//! a handler (respecting the thread's pin), the registry narrows the
//! capability snapshot to what that handler may use, and the execution loop
//! alternates between the reasoning model and tool invocations until the
//! model produces a final reply or a bound is hit.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod registry;

pub use classifier::{Classifier, RouteDecision};
pub use config::{ProviderSettings, ProviderTransportSettings, RelayConfig};
pub use coordinator::{Coordinator, TurnRequest, TurnResponse};
pub use executor::{ExecutionLoop, LoopLimits, TurnOutcome, TurnStatus};
pub use registry::HandlerRegistry;
