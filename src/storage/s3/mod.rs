pub mod client_builder;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, Delete, ExpirationStatus, LifecycleRule, ObjectIdentifier,
};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use leaky_bucket::RateLimiter;

use crate::config::ObjClientOptions;
use crate::deleter::{BatchDelete, DeleteResult, is_retryable_error_code};
use crate::lister::{ObjectListIterator, PageFetcher};
use crate::storage::{ObjStorageClient, exec_rate_limit_objects_per_sec_n, with_request_timeout};
use crate::types::response::ERROR_CODE_REQUEST_TIMEOUT;
use crate::types::token::DeletionCancellationToken;
use crate::types::{
    FailedKey, ListingPage, ObjectMeta, ObjectStoragePath, ObjectStorageResponse,
    ObjectStorageResult, Outcome, VersioningStatus,
};

const BACKEND_NAME: &str = "s3";

/// DeleteObjects accepts at most 1000 keys per request.
const MAX_DELETE_OBJECTS_KEYS: usize = 1000;
const MAX_LIST_KEYS: usize = 1000;

const ERROR_CODE_NO_SUCH_KEY: &str = "NoSuchKey";
const ERROR_CODE_NO_SUCH_LIFECYCLE_CONFIGURATION: &str = "NoSuchLifecycleConfiguration";

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "InternalError") and the human-readable error
/// message from the response. For other error types (network, timeout,
/// construction failure), returns "N/A" as the code and the full error
/// description as the message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

/// Map an SDK failure to a retryable or permanent response.
///
/// Transport failures and timeouts are retryable. A request that could not
/// be built will fail the same way next time.
fn classify_sdk_error<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> ObjectStorageResponse {
    let (_, message) = extract_sdk_error_details(e);
    match e {
        SdkError::ServiceError(context) => classify_service_error(
            context.err().code(),
            context.raw().status().as_u16(),
            message,
        ),
        SdkError::TimeoutError(_) => {
            ObjectStorageResponse::retryable(message).with_error_code(ERROR_CODE_REQUEST_TIMEOUT)
        }
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ObjectStorageResponse::retryable(message)
        }
        SdkError::ConstructionFailure(_) => ObjectStorageResponse::permanent(message),
        _ => ObjectStorageResponse::retryable(message),
    }
}

fn classify_service_error(code: Option<&str>, status: u16, message: String) -> ObjectStorageResponse {
    match code {
        Some(ERROR_CODE_NO_SUCH_KEY) | Some("NotFound") => {
            return ObjectStorageResponse::not_found(message);
        }
        None if status == 404 => return ObjectStorageResponse::not_found(message),
        _ => {}
    }

    let retryable = code.is_some_and(|code| {
        is_retryable_error_code(code)
            || matches!(code, "Throttling" | "ThrottlingException" | "TooManyRequests")
    }) || Outcome::from_http_status(status) == Outcome::RetryableError;

    let response = if retryable {
        ObjectStorageResponse::retryable(message)
    } else {
        ObjectStorageResponse::permanent(message)
    }
    .with_http_status(status);

    match code {
        Some(code) => response.with_error_code(code),
        None => response,
    }
}

/// Objects without a usable modification time are never considered expired.
fn to_chrono_or_max(last_modified: Option<&aws_smithy_types::DateTime>) -> DateTime<Utc> {
    last_modified
        .and_then(|t| t.to_chrono_utc().ok())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn object_meta_from_s3_object(object: &aws_sdk_s3::types::Object) -> Option<ObjectMeta> {
    Some(ObjectMeta {
        key: object.key()?.to_string(),
        size: object.size().unwrap_or_default().max(0) as u64,
        last_modified: to_chrono_or_max(object.last_modified()),
        e_tag: object.e_tag().map(String::from),
        version_id: None,
    })
}

/// Per-key result of a quiet DeleteObjects call: every requested key that is
/// not reported in `Errors` was deleted. `NoSuchKey` counts as deleted.
fn delete_result_from_output(keys: &[String], output: &DeleteObjectsOutput) -> DeleteResult {
    let mut result = DeleteResult::default();
    let mut reported = HashSet::new();

    for error in output.errors() {
        let Some(key) = error.key() else {
            tracing::warn!("DeleteObjects returned an error entry without a key.");
            continue;
        };
        reported.insert(key.to_string());

        let code = error.code().unwrap_or("unknown");
        if code == ERROR_CODE_NO_SUCH_KEY {
            result.deleted.push(key.to_string());
            continue;
        }
        let outcome = if is_retryable_error_code(code) {
            Outcome::RetryableError
        } else {
            Outcome::PermanentError
        };
        result.failed.push(FailedKey {
            key: key.to_string(),
            outcome,
            error_code: code.to_string(),
            error_message: error.message().unwrap_or("no message").to_string(),
        });
    }

    result.deleted.extend(
        keys.iter()
            .filter(|key| !reported.contains(key.as_str()))
            .cloned(),
    );
    result
}

/// One ListObjectsV2 response as a listing page. A truncated response
/// without a continuation token is passed through as `has_more` with no
/// token; the iterator stops on it.
fn listing_page_from_output(output: &ListObjectsV2Output) -> ListingPage {
    let objects = output
        .contents()
        .iter()
        .filter_map(object_meta_from_s3_object)
        .collect();

    match (output.is_truncated(), output.next_continuation_token()) {
        (Some(true), Some(token)) => ListingPage::with_continuation(objects, token.to_string()),
        (Some(true), None) => ListingPage {
            objects,
            has_more: true,
            continuation_token: None,
        },
        _ => ListingPage::last(objects),
    }
}

/// Shortest `Expiration.Days` among enabled rules.
fn min_expiration_days(rules: &[LifecycleRule]) -> Option<i32> {
    rules
        .iter()
        .filter(|rule| *rule.status() == ExpirationStatus::Enabled)
        .filter_map(|rule| rule.expiration().and_then(|e| e.days()))
        .min()
}

fn versioning_status(status: Option<&BucketVersioningStatus>) -> VersioningStatus {
    match status {
        Some(BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
        Some(BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
        _ => VersioningStatus::Disabled,
    }
}

/// Amazon S3 and S3-compatible backends.
#[derive(Clone)]
pub struct S3ObjClient {
    client: Arc<Client>,
    default_options: ObjClientOptions,
    cancellation_token: DeletionCancellationToken,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl S3ObjClient {
    pub fn new(
        client: Arc<Client>,
        default_options: ObjClientOptions,
        cancellation_token: DeletionCancellationToken,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            client,
            default_options,
            cancellation_token,
            rate_limiter,
        }
    }

    fn page_fetcher(&self, prefix: &ObjectStoragePath, options: &ObjClientOptions) -> S3PageFetcher {
        S3PageFetcher {
            client: self.client.clone(),
            bucket: prefix.bucket.clone(),
            prefix: prefix.key.clone(),
            max_keys: options.effective_batch_size(MAX_LIST_KEYS) as i32,
            options: *options,
            rate_limiter: self.rate_limiter.clone(),
        }
    }

    async fn delete_object_inner(&self, bucket: &str, key: &str) -> ObjectStorageResult<()> {
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        match self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let response = classify_sdk_error(&e);
                if response.is_not_found() {
                    return Ok(());
                }
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    bucket = bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObject API call failed for s3://{}/{}: {} ({}).",
                    bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                Err(response)
            }
        }
    }
}

#[async_trait]
impl ObjStorageClient for S3ObjClient {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn default_options(&self) -> &ObjClientOptions {
        &self.default_options
    }

    fn cancellation_token(&self) -> &DeletionCancellationToken {
        &self.cancellation_token
    }

    fn batch_backend(&self) -> Arc<dyn BatchDelete> {
        Arc::new(self.clone())
    }

    async fn put_object(&self, path: &ObjectStoragePath, data: Bytes) -> ObjectStorageResponse {
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        let result = with_request_timeout("PutObject", self.default_options.request_timeout, async {
            self.client
                .put_object()
                .bucket(&path.bucket)
                .key(&path.key)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| {
                    let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                    tracing::error!(
                        bucket = path.bucket,
                        key = path.key,
                        s3_error_code = s3_error_code,
                        s3_error_message = s3_error_message,
                        "S3 PutObject API call failed for s3://{}: {} ({}).",
                        path,
                        s3_error_code,
                        s3_error_message,
                    );
                    classify_sdk_error(&e)
                })
        })
        .await;

        match result {
            Ok(_) => ObjectStorageResponse::ok().with_http_status(200),
            Err(e) => e,
        }
    }

    async fn head_object(&self, path: &ObjectStoragePath) -> ObjectStorageResult<ObjectMeta> {
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        let output = with_request_timeout("HeadObject", self.default_options.request_timeout, async {
            self.client
                .head_object()
                .bucket(&path.bucket)
                .key(&path.key)
                .send()
                .await
                .map_err(|e| {
                    let response = classify_sdk_error(&e);
                    if response.is_not_found() {
                        tracing::debug!(bucket = path.bucket, key = path.key, "object not found.");
                        return response;
                    }
                    let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                    tracing::error!(
                        bucket = path.bucket,
                        key = path.key,
                        s3_error_code = s3_error_code,
                        s3_error_message = s3_error_message,
                        "S3 HeadObject API call failed for s3://{}: {} ({}).",
                        path,
                        s3_error_code,
                        s3_error_message,
                    );
                    response
                })
        })
        .await?;

        Ok(ObjectMeta {
            key: path.key.clone(),
            size: output.content_length().unwrap_or_default().max(0) as u64,
            last_modified: to_chrono_or_max(output.last_modified()),
            e_tag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    fn list_objects(
        &self,
        prefix: &ObjectStoragePath,
        options: &ObjClientOptions,
    ) -> ObjectListIterator {
        ObjectListIterator::new(Box::new(self.page_fetcher(prefix, options)))
    }

    async fn delete_object(&self, path: &ObjectStoragePath) -> ObjectStorageResponse {
        let result = with_request_timeout(
            "DeleteObject",
            self.default_options.request_timeout,
            self.delete_object_inner(&path.bucket, &path.key),
        )
        .await;

        match result {
            Ok(()) => ObjectStorageResponse::ok(),
            Err(e) => e,
        }
    }

    async fn get_life_cycle(&self, bucket: &str) -> ObjectStorageResult<i32> {
        let output = with_request_timeout(
            "GetBucketLifecycleConfiguration",
            self.default_options.request_timeout,
            async {
                self.client
                    .get_bucket_lifecycle_configuration()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                        tracing::error!(
                            bucket = bucket,
                            s3_error_code = s3_error_code,
                            s3_error_message = s3_error_message,
                            "S3 GetBucketLifecycleConfiguration API call failed for bucket '{}': {} ({}).",
                            bucket,
                            s3_error_code,
                            s3_error_message,
                        );
                        classify_sdk_error(&e)
                    })
            },
        )
        .await?;

        min_expiration_days(output.rules()).ok_or_else(|| {
            ObjectStorageResponse::permanent(format!(
                "bucket '{bucket}' has no enabled lifecycle rule with an expiration in days."
            ))
            .with_error_code(ERROR_CODE_NO_SUCH_LIFECYCLE_CONFIGURATION)
        })
    }

    async fn check_versioning(&self, bucket: &str) -> ObjectStorageResult<VersioningStatus> {
        let output = with_request_timeout(
            "GetBucketVersioning",
            self.default_options.request_timeout,
            async {
                self.client
                    .get_bucket_versioning()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                        tracing::error!(
                            bucket = bucket,
                            s3_error_code = s3_error_code,
                            s3_error_message = s3_error_message,
                            "S3 GetBucketVersioning API call failed for bucket '{}': {} ({}).",
                            bucket,
                            s3_error_code,
                            s3_error_message,
                        );
                        classify_sdk_error(&e)
                    })
            },
        )
        .await?;

        Ok(versioning_status(output.status()))
    }
}

#[async_trait]
impl BatchDelete for S3ObjClient {
    fn max_batch_size(&self) -> usize {
        MAX_DELETE_OBJECTS_KEYS
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> ObjectStorageResult<DeleteResult> {
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, keys.len()).await;

        let object_count = keys.len();
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                ObjectStorageResponse::permanent(format!("failed to build DeleteObjects request: {e}."))
            })?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| {
                ObjectStorageResponse::permanent(format!("failed to build DeleteObjects request: {e}."))
            })?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} objects in bucket '{}': {} ({}).",
                    object_count,
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                classify_sdk_error(&e)
            })?;

        Ok(delete_result_from_output(keys, &output))
    }

    async fn delete_one(&self, bucket: &str, key: &str) -> ObjectStorageResponse {
        match self.delete_object_inner(bucket, key).await {
            Ok(()) => ObjectStorageResponse::ok(),
            Err(e) => e,
        }
    }
}

/// ListObjectsV2 pages for one prefix.
struct S3PageFetcher {
    client: Arc<Client>,
    bucket: String,
    prefix: String,
    max_keys: i32,
    options: ObjClientOptions,
    rate_limiter: Option<Arc<RateLimiter>>,
}

#[async_trait]
impl PageFetcher for S3PageFetcher {
    async fn fetch_page(
        &self,
        continuation_token: Option<String>,
    ) -> ObjectStorageResult<ListingPage> {
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        let output = with_request_timeout("ListObjectsV2", self.options.request_timeout, async {
            self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(continuation_token)
                .max_keys(self.max_keys)
                .send()
                .await
                .map_err(|e| {
                    let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                    tracing::error!(
                        bucket = self.bucket,
                        prefix = self.prefix,
                        s3_error_code = s3_error_code,
                        s3_error_message = s3_error_message,
                        "S3 ListObjectsV2 API call failed for s3://{}/{}: {} ({}).",
                        self.bucket,
                        self.prefix,
                        s3_error_code,
                        s3_error_message,
                    );
                    classify_sdk_error(&e)
                })
        })
        .await?;

        Ok(listing_page_from_output(&output))
    }
}
