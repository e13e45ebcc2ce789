use thiserror::Error;

/// Error taxonomy for the relay.
///
/// Provider and capability failures are kept distinct from routing and
/// reasoning failures so callers can decide what is recoverable inside a
/// turn and what aborts it.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A capability provider could not be reached or misbehaved.
    #[error("provider error: {0}")]
    Provider(String),

    /// A capability lookup or invocation failed.
    #[error("capability error: {0}")]
    Capability(String),

    /// The classifier could not produce a usable route.
    #[error("routing error: {0}")]
    Routing(String),

    /// The reasoning model call failed.
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
