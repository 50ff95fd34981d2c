use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use tracing::warn;

use crate::config::{ClientConfig, ObjClientOptions, ObjectStoreConfig};
use crate::deleter::{BatchDelete, BatchDeleter};
use crate::filters::FilterChain;
use crate::lister::ObjectListIterator;
use crate::types::token::DeletionCancellationToken;
use crate::types::{
    ObjectMeta, ObjectStoragePath, ObjectStorageResponse, ObjectStorageResult, VersioningStatus,
};

pub mod objstore;
pub mod s3;

/// Type alias for a boxed client trait object.
pub type ObjStorage = Box<dyn ObjStorageClient>;

/// Uniform put / head / list / delete contract over one object storage
/// provider.
///
/// Every operation classifies its failures as retryable or permanent through
/// [`ObjectStorageResponse::outcome`]; nothing panics and nothing is
/// swallowed. Operations without a payload return the response directly,
/// operations with a payload return [`ObjectStorageResult`].
///
/// Bulk deletes are implemented once, on top of the backend's
/// [`BatchDelete`] primitive.
#[async_trait]
pub trait ObjStorageClient: DynClone + Send + Sync {
    /// Short provider name used in log records and `Unsupported` messages.
    fn backend_name(&self) -> &'static str;

    /// Options used by operations that take none explicitly.
    fn default_options(&self) -> &ObjClientOptions;

    fn cancellation_token(&self) -> &DeletionCancellationToken;

    /// The batch delete primitive driving `delete_objects` and
    /// `delete_objects_recursively`.
    fn batch_backend(&self) -> Arc<dyn BatchDelete>;

    async fn put_object(&self, path: &ObjectStoragePath, data: Bytes) -> ObjectStorageResponse;

    /// Metadata of one object. An absent object is a PermanentError with
    /// error code `NotFound`.
    async fn head_object(&self, path: &ObjectStoragePath) -> ObjectStorageResult<ObjectMeta>;

    /// Lazily list every object whose key starts with `prefix.key`.
    ///
    /// Nothing is fetched until the iterator is polled; listing errors are
    /// yielded by the iterator.
    fn list_objects(
        &self,
        prefix: &ObjectStoragePath,
        options: &ObjClientOptions,
    ) -> ObjectListIterator;

    /// Delete one object. Deleting an absent object is OK.
    async fn delete_object(&self, path: &ObjectStoragePath) -> ObjectStorageResponse;

    /// Shortest expiration, in days, among the bucket's enabled lifecycle rules.
    async fn get_life_cycle(&self, bucket: &str) -> ObjectStorageResult<i32>;

    async fn check_versioning(&self, bucket: &str) -> ObjectStorageResult<VersioningStatus>;

    /// Delete `keys` from `bucket` using batch requests.
    ///
    /// The number of batch requests is `ceil(keys.len() / effective batch
    /// size)`. Absent keys count as deleted.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
        options: &ObjClientOptions,
    ) -> ObjectStorageResponse {
        if bucket.is_empty() {
            return ObjectStorageResponse::invalid_argument("bucket name must not be empty.");
        }
        if keys.is_empty() {
            return ObjectStorageResponse::aggregate(vec![], vec![], vec![]);
        }

        BatchDeleter::new(
            self.batch_backend(),
            *options,
            self.cancellation_token().clone(),
        )
        .delete_keys(bucket, keys)
        .await
    }

    /// Delete every object under `prefix`, keeping objects last modified at
    /// or after `expiration_time`. `None` deletes everything under the prefix.
    async fn delete_objects_recursively(
        &self,
        prefix: &ObjectStoragePath,
        options: &ObjClientOptions,
        expiration_time: Option<DateTime<Utc>>,
    ) -> ObjectStorageResponse {
        if prefix.bucket.is_empty() {
            return ObjectStorageResponse::invalid_argument("bucket name must not be empty.");
        }

        let listing = self.list_objects(prefix, options);
        BatchDeleter::new(
            self.batch_backend(),
            *options,
            self.cancellation_token().clone(),
        )
        .delete_listed(
            &prefix.bucket,
            listing,
            FilterChain::for_expiration_time(expiration_time),
        )
        .await
    }
}

dyn_clone::clone_trait_object!(ObjStorageClient);

/// Run one backend call with a deadline. Expiry is a RetryableError with
/// error code `RequestTimeout`.
pub async fn with_request_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> ObjectStorageResult<T>
where
    F: Future<Output = ObjectStorageResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation = operation,
                timeout_milliseconds = timeout.as_millis() as u64,
                "{} timed out after {} ms.",
                operation,
                timeout.as_millis(),
            );
            Err(ObjectStorageResponse::timeout(operation))
        }
    }
}

// Default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// Objects-per-second limiter shared by every operation of one client.
pub fn build_rate_limiter(rate_limit_value: u32) -> Arc<RateLimiter> {
    let refill = if (rate_limit_value as usize) <= REFILL_PER_INTERVAL_DIVIDER {
        1
    } else {
        rate_limit_value as usize / REFILL_PER_INTERVAL_DIVIDER
    };
    Arc::new(
        RateLimiter::builder()
            .max(rate_limit_value as usize)
            .initial(rate_limit_value as usize)
            .refill(refill)
            .fair(true)
            .build(),
    )
}

/// Acquire `count` objects worth of rate limit, if a limiter is configured.
pub(crate) async fn exec_rate_limit_objects_per_sec_n(
    rate_limiter: &Option<Arc<RateLimiter>>,
    count: usize,
) {
    if count == 0 {
        return;
    }
    if let Some(rate_limiter) = rate_limiter {
        rate_limiter.acquire(count).await;
    }
}

/// Create an S3 (or S3-compatible) client.
pub async fn create_s3_client(
    client_config: &ClientConfig,
    default_options: ObjClientOptions,
    cancellation_token: DeletionCancellationToken,
) -> ObjStorage {
    let rate_limiter = client_config.rate_limit_objects.map(build_rate_limiter);
    let client = Arc::new(client_config.create_client().await);
    Box::new(s3::S3ObjClient::new(
        client,
        default_options,
        cancellation_token,
        rate_limiter,
    ))
}

/// Create an Azure Blob Storage, Google Cloud Storage or in-memory client.
pub fn create_object_store_client(
    store_config: &ObjectStoreConfig,
    rate_limit_objects: Option<u32>,
    default_options: ObjClientOptions,
    cancellation_token: DeletionCancellationToken,
) -> Result<ObjStorage> {
    let client = objstore::ObjectStoreObjClient::from_config(
        store_config,
        default_options,
        cancellation_token,
        rate_limit_objects.map(build_rate_limiter),
    )?;
    Ok(Box::new(client))
}
