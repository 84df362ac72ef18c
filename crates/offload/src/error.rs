//! Error types for offload.

use thiserror::Error;

/// Result type for offload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of an invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// No module registered under the given name.
    #[error("module \"{0}\" is not registered")]
    ModuleNotFound(String),

    /// The module exists but has no such method.
    #[error("method \"{method}\" not found in module \"{module}\"")]
    MethodNotFound { module: String, method: String },

    /// The worker received malformed startup data.
    #[error("invalid startup data: {0}")]
    InvalidStartupData(String),

    /// The target function failed; carries the relayed detail text.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The isolation layer itself faulted (spawn failure, broken channel).
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The worker terminated abnormally without reporting an outcome.
    #[error("worker exited with {status} before reporting an outcome")]
    WorkerExit { status: String },

    /// No outcome arrived within the configured timeout; the worker was killed.
    #[error("worker timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raised by an exported handler.
///
/// Carries display text only: error structure cannot cross the isolation
/// boundary, so this is what a failure outcome relays back to the caller.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Create a handler error from display text.
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

impl From<String> for HandlerError {
    fn from(detail: String) -> Self {
        Self(detail)
    }
}

impl From<&str> for HandlerError {
    fn from(detail: &str) -> Self {
        Self(detail.to_string())
    }
}
