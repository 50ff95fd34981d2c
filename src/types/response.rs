//! Uniform result model shared by every `ObjStorageClient` operation.
//!
//! Retry policy is decided from [`Outcome`] alone. `http_status` and
//! `error_code` are carried for diagnostics only.

use std::fmt;

use thiserror::Error;

/// Error code for an object or bucket that does not exist.
pub const ERROR_CODE_NOT_FOUND: &str = "NotFound";
/// Error code for a feature the backend does not offer (lifecycle, versioning).
pub const ERROR_CODE_UNSUPPORTED: &str = "Unsupported";
/// Error code used when `request_timeout` elapsed before the backend answered.
pub const ERROR_CODE_REQUEST_TIMEOUT: &str = "RequestTimeout";
/// Error code used when the operation stopped early on a cancellation signal.
pub const ERROR_CODE_CANCELLED: &str = "Cancelled";
/// Error code used for caller-side input problems.
pub const ERROR_CODE_INVALID_ARGUMENT: &str = "InvalidArgument";

pub type ObjectStorageResult<T> = Result<T, ObjectStorageResponse>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    Ok,
    PermanentError,
    RetryableError,
}

impl Outcome {
    /// Classify an HTTP status code returned by a backend.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200..=299 => Outcome::Ok,
            408 | 429 => Outcome::RetryableError,
            500..=599 => Outcome::RetryableError,
            _ => Outcome::PermanentError,
        }
    }

    /// The more severe of two outcomes.
    ///
    /// RetryableError ranks above PermanentError: a retry of the whole
    /// operation is safe because every operation here is idempotent.
    pub fn worst(self, other: Outcome) -> Outcome {
        self.max(other)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Ok => "OK",
            Outcome::RetryableError => "RetryableError",
            Outcome::PermanentError => "PermanentError",
        };
        f.write_str(s)
    }
}

/// A key that could not be deleted, with its own classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedKey {
    pub key: String,
    pub outcome: Outcome,
    pub error_code: String,
    pub error_message: String,
}

impl FailedKey {
    pub fn is_retryable(&self) -> bool {
        self.outcome == Outcome::RetryableError
    }
}

/// Result of an object storage operation.
///
/// For batch and recursive deletes, `deleted` lists every key confirmed
/// deleted (absent keys included) and `failed` every key that was not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{outcome}: {message}")]
pub struct ObjectStorageResponse {
    pub outcome: Outcome,
    pub http_status: Option<u16>,
    pub error_code: Option<String>,
    pub message: String,
    pub deleted: Vec<String>,
    pub failed: Vec<FailedKey>,
}

impl ObjectStorageResponse {
    pub fn ok() -> Self {
        Self {
            outcome: Outcome::Ok,
            http_status: None,
            error_code: None,
            message: String::new(),
            deleted: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::error(Outcome::RetryableError, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::error(Outcome::PermanentError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::permanent(message)
            .with_error_code(ERROR_CODE_NOT_FOUND)
            .with_http_status(404)
    }

    pub fn unsupported(feature: &str, backend: &str) -> Self {
        Self::permanent(format!("{feature} is not supported by the {backend} backend."))
            .with_error_code(ERROR_CODE_UNSUPPORTED)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::retryable(format!("{operation} timed out."))
            .with_error_code(ERROR_CODE_REQUEST_TIMEOUT)
    }

    pub fn cancelled() -> Self {
        Self::retryable("operation cancelled.").with_error_code(ERROR_CODE_CANCELLED)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::permanent(message).with_error_code(ERROR_CODE_INVALID_ARGUMENT)
    }

    fn error(outcome: Outcome, message: impl Into<String>) -> Self {
        debug_assert!(!outcome.is_ok());
        Self {
            outcome,
            message: message.into(),
            ..Self::ok()
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_retryable(&self) -> bool {
        self.outcome == Outcome::RetryableError
    }

    pub fn is_not_found(&self) -> bool {
        self.error_code.as_deref() == Some(ERROR_CODE_NOT_FOUND)
    }

    pub fn is_unsupported(&self) -> bool {
        self.error_code.as_deref() == Some(ERROR_CODE_UNSUPPORTED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_code.as_deref() == Some(ERROR_CODE_CANCELLED)
    }

    /// Convert into a `Result`, keeping the response on the error side
    /// unless the outcome is Ok.
    pub fn into_result(self) -> ObjectStorageResult<Self> {
        if self.is_ok() { Ok(self) } else { Err(self) }
    }

    /// Build the aggregate response of a batch or recursive delete.
    ///
    /// `errors` are operation-level failures (listing, cancellation) that are
    /// not attributable to a single key.
    pub fn aggregate(
        deleted: Vec<String>,
        failed: Vec<FailedKey>,
        errors: Vec<ObjectStorageResponse>,
    ) -> Self {
        let outcome = failed
            .iter()
            .map(|f| f.outcome)
            .chain(errors.iter().map(|e| e.outcome))
            .fold(Outcome::Ok, Outcome::worst);

        if outcome.is_ok() {
            return Self {
                message: format!("{} objects deleted.", deleted.len()),
                deleted,
                ..Self::ok()
            };
        }

        let mut message = String::new();
        if !failed.is_empty() {
            let details = failed
                .iter()
                .map(|f| format!("{} ({}: {})", f.key, f.error_code, f.error_message))
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!(
                "failed to delete {} of {} objects: [{}].",
                failed.len(),
                failed.len() + deleted.len(),
                details
            ));
        }
        for error in &errors {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&error.message);
        }

        // Surface the code of the most severe operation-level error, if any.
        // On ties a real failure wins over the cancellation, then the earliest.
        let worst_error = errors
            .iter()
            .min_by_key(|e| (std::cmp::Reverse(e.outcome), e.is_cancelled()));

        Self {
            outcome,
            http_status: worst_error.and_then(|e| e.http_status),
            error_code: worst_error.and_then(|e| e.error_code.clone()),
            message,
            deleted,
            failed,
        }
    }
}

impl Default for ObjectStorageResponse {
    fn default() -> Self {
        Self::ok()
    }
}
