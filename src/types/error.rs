use anyhow::Error;
use thiserror::Error;

use crate::types::response::{ObjectStorageResponse, Outcome};

/// Application-level errors raised outside the per-operation response model:
/// client construction, argument validation and command execution.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Cancelled
/// - 1: Permanent storage errors and general failures
/// - 2: Configuration errors (InvalidConfig, InvalidUri)
/// - 3: Retryable storage errors (the same command may be run again)
#[derive(Error, Debug, PartialEq)]
pub enum ObjRecycleError {
    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid object storage URI.
    #[error("Invalid object storage URI: {0}")]
    InvalidUri(String),

    /// A storage operation returned a non-OK response.
    #[error("Object storage error: {0}")]
    Storage(ObjectStorageResponse),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,
}

impl ObjRecycleError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ObjRecycleError::Cancelled => 0,
            ObjRecycleError::InvalidConfig(_) | ObjRecycleError::InvalidUri(_) => 2,
            ObjRecycleError::Storage(response) => match response.outcome {
                Outcome::RetryableError => 3,
                _ => 1,
            },
        }
    }

    /// Only storage errors classified as retryable are worth re-running.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ObjRecycleError::Storage(response) if response.is_retryable())
    }
}

impl From<ObjectStorageResponse> for ObjRecycleError {
    /// A cancelled response maps to `Cancelled` only when no key failed;
    /// otherwise the failed keys are kept and reported.
    fn from(response: ObjectStorageResponse) -> Self {
        if response.is_cancelled() && response.failed.is_empty() {
            ObjRecycleError::Cancelled
        } else {
            ObjRecycleError::Storage(response)
        }
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<ObjRecycleError>() {
        return *err == ObjRecycleError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<ObjRecycleError>() {
        return err.exit_code();
    }
    1
}
