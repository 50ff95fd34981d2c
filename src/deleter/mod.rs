//! Backend-independent bulk deletion.
//!
//! Every backend exposes its native multi-object delete through
//! [`BatchDelete`]. [`BatchDeleter`] splits keys into chunks no larger than
//! the backend cap, runs up to `max_concurrency` chunk requests at once and
//! folds the per-key results into one aggregate [`ObjectStorageResponse`].
//!
//! ```text
//! keys / listing ──► chunker ──► bounded channel ──► N chunk workers ──► aggregate
//! ```

use async_trait::async_trait;

use crate::types::{FailedKey, ObjectStorageResponse, ObjectStorageResult};

pub mod batch;

pub use batch::{BatchDeleter, is_retryable_error_code};

#[cfg(test)]
mod tests;

/// Per-key result of one or more batch delete requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    /// Keys confirmed deleted. Keys that were already absent count as deleted.
    pub deleted: Vec<String>,
    pub failed: Vec<FailedKey>,
}

impl DeleteResult {
    pub fn merge(&mut self, other: DeleteResult) {
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
    }

    /// Mark every key of a chunk as failed with the classification of the
    /// request-level failure.
    pub fn all_failed(keys: Vec<String>, response: &ObjectStorageResponse) -> Self {
        let error_code = response
            .error_code
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            deleted: Vec::new(),
            failed: keys
                .into_iter()
                .map(|key| FailedKey {
                    key,
                    outcome: response.outcome,
                    error_code: error_code.clone(),
                    error_message: response.message.clone(),
                })
                .collect(),
        }
    }
}

/// Native multi-object delete of one backend.
///
/// `delete_batch` is never called with more than `max_batch_size()` keys.
/// An `Err` means the whole request failed and no key of the chunk is known
/// to be deleted; per-key failures are reported in `DeleteResult::failed`.
#[async_trait]
pub trait BatchDelete: Send + Sync {
    fn max_batch_size(&self) -> usize;

    async fn delete_batch(&self, bucket: &str, keys: &[String])
    -> ObjectStorageResult<DeleteResult>;

    /// Single-object delete used as the fallback for retryable per-key
    /// failures. An absent key is OK.
    async fn delete_one(&self, bucket: &str, key: &str) -> ObjectStorageResponse;
}
