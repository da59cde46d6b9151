//! Error types for the withChangeSets step

use thiserror::Error;

/// Failure to hand a body invocation request to the host.
///
/// These never fail the step: the fan-out logs them and moves on to the
/// next path.
#[derive(Error, Debug)]
pub enum InvokeError {
    /// I/O failure while the host prepared the invocation
    #[error("I/O error while starting body: {0}")]
    Io(#[from] std::io::Error),

    /// The host was interrupted before the invocation could be scheduled
    #[error("Interrupted while starting body: {0}")]
    Interrupted(String),

    /// No async runtime available to schedule the body on
    #[error("No runtime available to schedule body")]
    NoRuntime,
}

/// Failure while applying an environment expander.
#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("Invalid environment variable name: {0:?}")]
    InvalidName(String),

    #[error("Environment expansion failed: {0}")]
    Other(String),
}

/// Failure reported by an invoked body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Body failed: {message}")]
pub struct BodyFailure {
    pub message: String,
}

impl BodyFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal failure of a step invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// At least one issued body reported failure
    #[error("{failed} body invocation(s) failed; first: {first}")]
    BodyFailed { failed: usize, first: BodyFailure },

    /// Accepted bodies whose callbacks were dropped without a result
    #[error("{count} body invocation(s) never reported back")]
    BodyAbandoned { count: usize },

    /// The completion channel closed before an outcome was delivered
    #[error("Step completion was lost before all bodies reported back")]
    CompletionLost,
}

/// Errors raised by the JSON build-history host adapter.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read build history: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse build history: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Build #{0} not found in history")]
    UnknownBuild(u64),

    #[error("Build history is empty")]
    Empty,
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;
