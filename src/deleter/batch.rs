use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ObjClientOptions;
use crate::filters::FilterChain;
use crate::lister::ObjectListIterator;
use crate::storage::with_request_timeout;
use crate::types::token::DeletionCancellationToken;
use crate::types::{FailedKey, ObjectStorageResponse};

use super::{BatchDelete, DeleteResult};

const FALLBACK_RETRY_INTERVAL_MILLISECONDS: u64 = 200;

/// Determines whether a per-key batch deletion error code is retryable.
///
/// Retryable errors are transient server-side issues that may succeed
/// on a subsequent attempt:
/// - `InternalError` / `ServiceUnavailable`: transient server errors
/// - `SlowDown`: throttling
/// - `RequestTimeout` / `RequestTimeTooSkewed`: transient network or clock issues
/// - `unknown`: the backend did not say
///
/// Other codes (e.g. `AccessDenied`) are permanent.
pub fn is_retryable_error_code(code: &str) -> bool {
    matches!(
        code,
        "InternalError"
            | "SlowDown"
            | "ServiceUnavailable"
            | "RequestTimeout"
            | "RequestTimeTooSkewed"
            | "unknown"
    )
}

/// Drives chunked, concurrent deletion over a [`BatchDelete`] backend.
pub struct BatchDeleter {
    backend: Arc<dyn BatchDelete>,
    options: ObjClientOptions,
    cancellation_token: DeletionCancellationToken,
}

impl BatchDeleter {
    pub fn new(
        backend: Arc<dyn BatchDelete>,
        options: ObjClientOptions,
        cancellation_token: DeletionCancellationToken,
    ) -> Self {
        Self {
            backend,
            options,
            cancellation_token,
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        self.options
            .effective_batch_size(self.backend.max_batch_size())
    }

    /// Delete `keys` from `bucket` in chunks of the effective batch size.
    pub async fn delete_keys(&self, bucket: &str, keys: Vec<String>) -> ObjectStorageResponse {
        let batch_size = self.effective_batch_size();
        debug!(
            bucket = bucket,
            object_count = keys.len(),
            batch_size = batch_size,
            "batch deletion has started."
        );

        let cancellation_token = self.cancellation_token.clone();
        self.run(bucket, move |sender| async move {
            let mut errors = Vec::new();
            for chunk in keys.chunks(batch_size) {
                if !dispatch(&sender, &cancellation_token, chunk.to_vec()).await {
                    if cancellation_token.is_cancelled() {
                        errors.push(ObjectStorageResponse::cancelled());
                    }
                    break;
                }
            }
            errors
        })
        .await
    }

    /// Delete every object listed by `listing` that passes `filters`.
    ///
    /// Listing and deletion are pipelined: chunks are dispatched while later
    /// pages are still being fetched. A listing error stops the listing,
    /// already eligible keys are still deleted, and the error is part of the
    /// aggregate response.
    pub async fn delete_listed(
        &self,
        bucket: &str,
        mut listing: ObjectListIterator,
        filters: FilterChain,
    ) -> ObjectStorageResponse {
        let batch_size = self.effective_batch_size();
        debug!(
            bucket = bucket,
            batch_size = batch_size,
            "recursive deletion has started."
        );

        let cancellation_token = self.cancellation_token.clone();
        let bucket_name = bucket.to_string();
        self.run(bucket, move |sender| async move {
            let mut errors = Vec::new();
            let mut pending: Vec<String> = Vec::with_capacity(batch_size);
            let mut filtered_count: usize = 0;

            'listing: loop {
                if cancellation_token.is_cancelled() {
                    errors.push(ObjectStorageResponse::cancelled());
                    return errors;
                }

                let page = tokio::select! {
                    page = listing.next_page() => page,
                    _ = cancellation_token.cancelled() => {
                        errors.push(ObjectStorageResponse::cancelled());
                        return errors;
                    }
                };

                let objects = match page {
                    None => break,
                    Some(Ok(objects)) => objects,
                    Some(Err(e)) => {
                        error!(
                            bucket = bucket_name,
                            outcome = %e.outcome,
                            error_code = e.error_code,
                            error = e.message,
                            "listing failed during recursive deletion."
                        );
                        errors.push(e);
                        break;
                    }
                };

                for object in objects {
                    if !filters.is_match(&object) {
                        filtered_count += 1;
                        continue;
                    }
                    pending.push(object.key);
                    if pending.len() >= batch_size {
                        let chunk = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
                        if !dispatch(&sender, &cancellation_token, chunk).await {
                            if cancellation_token.is_cancelled() {
                                errors.push(ObjectStorageResponse::cancelled());
                            }
                            break 'listing;
                        }
                    }
                }
            }

            if !pending.is_empty()
                && !dispatch(&sender, &cancellation_token, pending).await
                && cancellation_token.is_cancelled()
                && !errors.iter().any(|e| e.is_cancelled())
            {
                errors.push(ObjectStorageResponse::cancelled());
            }

            debug!(
                bucket = bucket_name,
                pages = listing.pages_fetched(),
                filtered_count = filtered_count,
                "listing for recursive deletion has been completed."
            );
            errors
        })
        .await
    }

    /// Spawn the chunk workers, run `producer` against the chunk channel and
    /// join everything into the aggregate response.
    async fn run<P, F>(&self, bucket: &str, producer: P) -> ObjectStorageResponse
    where
        P: FnOnce(Sender<Vec<String>>) -> F,
        F: Future<Output = Vec<ObjectStorageResponse>>,
    {
        let concurrency = self.options.effective_concurrency();
        let (sender, receiver) = async_channel::bounded::<Vec<String>>(concurrency);

        let mut workers = JoinSet::new();
        for worker_index in 0..concurrency {
            let worker = ChunkWorker {
                worker_index,
                backend: self.backend.clone(),
                bucket: bucket.to_string(),
                request_timeout: self.options.request_timeout,
                fallback_retries: self.options.single_delete_fallback_retries,
                cancellation_token: self.cancellation_token.clone(),
            };
            let receiver = receiver.clone();
            workers.spawn(async move { worker.run(receiver).await });
        }
        drop(receiver);

        // The producer owns the only sender; dropping it closes the channel
        // and lets idle workers finish.
        let mut errors = producer(sender).await;

        let mut result = DeleteResult::default();
        let mut skipped_chunks = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((worker_result, skipped)) => {
                    result.merge(worker_result);
                    skipped_chunks |= skipped;
                }
                Err(e) => {
                    error!(bucket = bucket, error = %e, "delete worker terminated abnormally.");
                    errors.push(ObjectStorageResponse::permanent(format!(
                        "delete worker terminated abnormally: {e}."
                    )));
                }
            }
        }

        if skipped_chunks && !errors.iter().any(|e| e.is_cancelled()) {
            errors.push(ObjectStorageResponse::cancelled());
        }
        if errors.iter().any(|e| e.is_cancelled()) {
            info!(
                bucket = bucket,
                deleted = result.deleted.len(),
                "deletion has been cancelled."
            );
        }

        let response = ObjectStorageResponse::aggregate(result.deleted, result.failed, errors);
        debug!(
            bucket = bucket,
            outcome = %response.outcome,
            deleted = response.deleted.len(),
            failed = response.failed.len(),
            "deletion has been completed."
        );
        response
    }
}

/// Send one chunk to the workers. False when nothing more should be sent,
/// either because of cancellation or because every worker has stopped.
async fn dispatch(
    sender: &Sender<Vec<String>>,
    cancellation_token: &DeletionCancellationToken,
    chunk: Vec<String>,
) -> bool {
    if cancellation_token.is_cancelled() {
        return false;
    }
    tokio::select! {
        sent = sender.send(chunk) => sent.is_ok(),
        _ = cancellation_token.cancelled() => false,
    }
}

struct ChunkWorker {
    worker_index: usize,
    backend: Arc<dyn BatchDelete>,
    bucket: String,
    request_timeout: Duration,
    fallback_retries: u32,
    cancellation_token: DeletionCancellationToken,
}

impl ChunkWorker {
    /// Returns the merged result and whether a queued chunk was left
    /// undeleted because of cancellation.
    async fn run(self, receiver: Receiver<Vec<String>>) -> (DeleteResult, bool) {
        let mut result = DeleteResult::default();
        while let Ok(chunk) = receiver.recv().await {
            if self.cancellation_token.is_cancelled() {
                debug!(
                    worker_index = self.worker_index,
                    "delete worker has been cancelled."
                );
                return (result, !chunk.is_empty());
            }
            result.merge(self.delete_chunk(chunk).await);
        }
        (result, false)
    }

    async fn delete_chunk(&self, keys: Vec<String>) -> DeleteResult {
        let key_count = keys.len();
        debug!(
            worker_index = self.worker_index,
            bucket = self.bucket,
            batch_size = key_count,
            "sending batch delete request."
        );

        let response = with_request_timeout(
            "batch delete",
            self.request_timeout,
            self.backend.delete_batch(&self.bucket, &keys),
        )
        .await;

        let mut result = match response {
            Ok(result) => result,
            Err(e) => {
                error!(
                    worker_index = self.worker_index,
                    bucket = self.bucket,
                    object_count = key_count,
                    outcome = %e.outcome,
                    error_code = e.error_code,
                    error = e.message,
                    "batch delete request failed for bucket '{}'.",
                    self.bucket,
                );
                return DeleteResult::all_failed(keys, &e);
            }
        };

        if self.fallback_retries > 0 && result.failed.iter().any(|f| f.is_retryable()) {
            let failed = std::mem::take(&mut result.failed);
            for failed_key in failed {
                if !failed_key.is_retryable() {
                    result.failed.push(failed_key);
                    continue;
                }
                match self.delete_one_with_retry(failed_key).await {
                    Ok(key) => result.deleted.push(key),
                    Err(failed_key) => result.failed.push(failed_key),
                }
            }
        }

        for failed_key in &result.failed {
            warn!(
                bucket = self.bucket,
                key = failed_key.key,
                outcome = %failed_key.outcome,
                code = failed_key.error_code,
                message = failed_key.error_message,
                "batch delete partial failure for key '{}': {} ({}).",
                failed_key.key,
                failed_key.error_code,
                failed_key.error_message,
            );
        }

        debug!(
            worker_index = self.worker_index,
            deleted = result.deleted.len(),
            failed = result.failed.len(),
            "batch delete request completed."
        );
        result
    }

    /// Retry a retryable per-key failure with single-object deletes.
    async fn delete_one_with_retry(&self, mut failed_key: FailedKey) -> Result<String, FailedKey> {
        for attempt in 0..self.fallback_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(FALLBACK_RETRY_INTERVAL_MILLISECONDS))
                    .await;
            }

            let single_result = with_request_timeout("single delete", self.request_timeout, async {
                self.backend
                    .delete_one(&self.bucket, &failed_key.key)
                    .await
                    .into_result()
            })
            .await;
            let response = match single_result {
                Ok(_) => return Ok(failed_key.key),
                Err(response) => response,
            };

            warn!(
                key = failed_key.key,
                attempt = attempt + 1,
                max_attempts = self.fallback_retries,
                error = %response,
                "single delete fallback attempt {}/{} failed for key '{}'.",
                attempt + 1,
                self.fallback_retries,
                failed_key.key,
            );

            failed_key.outcome = response.outcome;
            if let Some(code) = response.error_code {
                failed_key.error_code = code;
            }
            failed_key.error_message = response.message;

            if !failed_key.is_retryable() {
                break;
            }
        }
        Err(failed_key)
    }
}
