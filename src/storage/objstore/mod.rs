//! Azure Blob Storage, Google Cloud Storage and in-memory backends on top of
//! the `object_store` crate.
//!
//! An `object_store` instance is bound to one container or bucket. Requests
//! naming any other bucket are rejected with `InvalidArgument`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use leaky_bucket::RateLimiter;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::{ObjClientOptions, ObjectStoreConfig};
use crate::deleter::{BatchDelete, DeleteResult};
use crate::lister::{ObjectListIterator, PageFetcher};
use crate::storage::{ObjStorageClient, exec_rate_limit_objects_per_sec_n, with_request_timeout};
use crate::types::token::DeletionCancellationToken;
use crate::types::{
    FailedKey, ListingPage, ObjectMeta, ObjectStoragePath, ObjectStorageResponse,
    ObjectStorageResult, VersioningStatus,
};

/// Keys per chunk. Azure blob batch requests accept at most 256 sub-requests.
const MAX_BATCH_DELETE_KEYS: usize = 256;
const MAX_LIST_PAGE_SIZE: usize = 5000;
/// Single deletes in flight within one chunk.
const BATCH_DELETE_PARALLELISM: usize = 16;

/// Map an `object_store` failure to a retryable or permanent response.
///
/// `Generic` errors are what remains after the store's own HTTP retries
/// (connection resets, 5xx, throttling) and are treated as retryable.
pub(crate) fn classify_object_store_error(e: &object_store::Error) -> ObjectStorageResponse {
    let message = e.to_string();
    match e {
        object_store::Error::NotFound { .. } => ObjectStorageResponse::not_found(message),
        object_store::Error::InvalidPath { .. } => {
            ObjectStorageResponse::invalid_argument(message)
        }
        object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented
        | object_store::Error::AlreadyExists { .. }
        | object_store::Error::Precondition { .. }
        | object_store::Error::NotModified { .. }
        | object_store::Error::UnknownConfigurationKey { .. } => {
            ObjectStorageResponse::permanent(message)
        }
        _ => ObjectStorageResponse::retryable(message),
    }
}

/// Parse a key without re-encoding it, so listed keys round-trip unchanged.
fn to_store_path(key: &str) -> ObjectStorageResult<Path> {
    Path::parse(key).map_err(|e| {
        ObjectStorageResponse::invalid_argument(format!("invalid object key '{key}': {e}."))
    })
}

/// Split a raw key prefix into the directory `object_store` can list and the
/// string every listed key must start with.
///
/// `logs/20` lists `logs` and keeps keys starting with `logs/20`.
fn listing_root(prefix: &str) -> ObjectStorageResult<Option<Path>> {
    match prefix.rfind('/') {
        Some(idx) if idx > 0 => Ok(Some(to_store_path(&prefix[..idx])?)),
        _ => Ok(None),
    }
}

fn object_meta_from_store(meta: object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        key: meta.location.to_string(),
        size: meta.size as u64,
        last_modified: meta.last_modified,
        e_tag: meta.e_tag,
        version_id: meta.version,
    }
}

/// `object_store`-backed client for Azure, GCS and the in-memory store.
#[derive(Clone)]
pub struct ObjectStoreObjClient {
    store: Arc<dyn ObjectStore>,
    provider: &'static str,
    bucket: String,
    default_options: ObjClientOptions,
    cancellation_token: DeletionCancellationToken,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ObjectStoreObjClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        provider: &'static str,
        bucket: impl Into<String>,
        default_options: ObjClientOptions,
        cancellation_token: DeletionCancellationToken,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            store,
            provider,
            bucket: bucket.into(),
            default_options,
            cancellation_token,
            rate_limiter,
        }
    }

    /// Build the store described by `store_config`.
    ///
    /// Without an account key Azure falls back to the default credential
    /// chain. Without a service account file GCS uses application default
    /// credentials.
    pub fn from_config(
        store_config: &ObjectStoreConfig,
        default_options: ObjClientOptions,
        cancellation_token: DeletionCancellationToken,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match store_config {
            ObjectStoreConfig::Azure {
                account_name,
                container_name,
                account_key,
                endpoint,
            } => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(account_name)
                    .with_container_name(container_name);
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint.clone());
                }
                if let Some(key) = account_key {
                    builder = builder.with_access_key(key);
                    debug!("Azure authentication: Account key");
                } else {
                    debug!("Azure authentication: DefaultAzureCredential chain");
                }
                Arc::new(
                    builder
                        .build()
                        .context("Failed to create Azure Blob Storage client.")?,
                )
            }
            ObjectStoreConfig::Gcs {
                bucket,
                service_account_path,
            } => {
                let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
                if let Some(path) = service_account_path {
                    builder = builder.with_service_account_path(path);
                }
                Arc::new(
                    builder
                        .build()
                        .context("Failed to create Google Cloud Storage client.")?,
                )
            }
            ObjectStoreConfig::Memory { .. } => Arc::new(InMemory::new()),
        };

        info!(
            provider = store_config.provider_name(),
            bucket = store_config.bucket(),
            "object store client has been created."
        );

        Ok(Self::new(
            store,
            store_config.provider_name(),
            store_config.bucket(),
            default_options,
            cancellation_token,
            rate_limiter,
        ))
    }

    fn check_bucket(&self, bucket: &str) -> ObjectStorageResult<()> {
        if bucket == self.bucket {
            return Ok(());
        }
        Err(ObjectStorageResponse::invalid_argument(format!(
            "bucket '{bucket}' is not served by this {} client (bound to '{}').",
            self.provider, self.bucket
        )))
    }

    async fn delete_key(&self, key: &str) -> ObjectStorageResult<()> {
        let path = to_store_path(key)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => {
                warn!(
                    provider = self.provider,
                    bucket = self.bucket,
                    key = key,
                    error = %e,
                    "{} delete failed for {}/{}: {}.",
                    self.provider,
                    self.bucket,
                    key,
                    e,
                );
                Err(classify_object_store_error(&e))
            }
        }
    }
}

#[async_trait]
impl ObjStorageClient for ObjectStoreObjClient {
    fn backend_name(&self) -> &'static str {
        self.provider
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
        let result = async {
            self.check_bucket(&path.bucket)?;
            let location = to_store_path(&path.key)?;
            exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

            with_request_timeout("put", self.default_options.request_timeout, async {
                self.store
                    .put(&location, PutPayload::from_bytes(data))
                    .await
                    .map_err(|e| {
                        error!(
                            provider = self.provider,
                            bucket = path.bucket,
                            key = path.key,
                            error = %e,
                            "{} put failed for {}: {}.",
                            self.provider,
                            path,
                            e,
                        );
                        classify_object_store_error(&e)
                    })
            })
            .await
        }
        .await;

        match result {
            Ok(_) => ObjectStorageResponse::ok(),
            Err(e) => e,
        }
    }

    async fn head_object(&self, path: &ObjectStoragePath) -> ObjectStorageResult<ObjectMeta> {
        self.check_bucket(&path.bucket)?;
        let location = to_store_path(&path.key)?;
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        let meta = with_request_timeout("head", self.default_options.request_timeout, async {
            self.store.head(&location).await.map_err(|e| {
                let response = classify_object_store_error(&e);
                if response.is_not_found() {
                    debug!(bucket = path.bucket, key = path.key, "object not found.");
                } else {
                    error!(
                        provider = self.provider,
                        bucket = path.bucket,
                        key = path.key,
                        error = %e,
                        "{} head failed for {}: {}.",
                        self.provider,
                        path,
                        e,
                    );
                }
                response
            })
        })
        .await?;

        Ok(object_meta_from_store(meta))
    }

    fn list_objects(
        &self,
        prefix: &ObjectStoragePath,
        options: &ObjClientOptions,
    ) -> ObjectListIterator {
        let setup = self
            .check_bucket(&prefix.bucket)
            .and_then(|_| listing_root(&prefix.key));

        ObjectListIterator::new(Box::new(ObjectStorePageFetcher {
            store: self.store.clone(),
            provider: self.provider,
            root: setup,
            prefix: prefix.key.clone(),
            page_size: options.effective_batch_size(MAX_LIST_PAGE_SIZE),
            request_timeout: options.request_timeout,
            rate_limiter: self.rate_limiter.clone(),
            receiver: OnceCell::new(),
        }))
    }

    async fn delete_object(&self, path: &ObjectStoragePath) -> ObjectStorageResponse {
        if let Err(e) = self.check_bucket(&path.bucket) {
            return e;
        }
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        match with_request_timeout(
            "delete",
            self.default_options.request_timeout,
            self.delete_key(&path.key),
        )
        .await
        {
            Ok(()) => ObjectStorageResponse::ok(),
            Err(e) => e,
        }
    }

    async fn get_life_cycle(&self, _bucket: &str) -> ObjectStorageResult<i32> {
        Err(ObjectStorageResponse::unsupported(
            "lifecycle configuration",
            self.provider,
        ))
    }

    async fn check_versioning(&self, _bucket: &str) -> ObjectStorageResult<VersioningStatus> {
        Err(ObjectStorageResponse::unsupported(
            "versioning status",
            self.provider,
        ))
    }
}

#[async_trait]
impl BatchDelete for ObjectStoreObjClient {
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_DELETE_KEYS
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> ObjectStorageResult<DeleteResult> {
        self.check_bucket(bucket)?;
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, keys.len()).await;

        let outcomes: Vec<(String, ObjectStorageResult<()>)> = futures::stream::iter(keys.to_vec())
            .map(|key| async move {
                let outcome = self.delete_key(&key).await;
                (key, outcome)
            })
            .buffer_unordered(BATCH_DELETE_PARALLELISM)
            .collect()
            .await;

        let mut result = DeleteResult::default();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(()) => result.deleted.push(key),
                Err(e) => result.failed.push(FailedKey {
                    key,
                    outcome: e.outcome,
                    error_code: e.error_code.unwrap_or_else(|| "unknown".to_string()),
                    error_message: e.message,
                }),
            }
        }
        Ok(result)
    }

    async fn delete_one(&self, bucket: &str, key: &str) -> ObjectStorageResponse {
        if let Err(e) = self.check_bucket(bucket) {
            return e;
        }
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        match self.delete_key(key).await {
            Ok(()) => ObjectStorageResponse::ok(),
            Err(e) => e,
        }
    }
}

/// Listed entries matching the raw prefix, in backend order.
type ListingReceiver = async_channel::Receiver<object_store::Result<object_store::ObjectMeta>>;

/// Pages over one `object_store` listing.
///
/// The backend listing is opened once, on the first page, and drained by a
/// background task into a bounded channel. Each page pulls up to `page_size`
/// entries from it, so the backend cursor is walked exactly once. The task
/// stops when the listing ends or when the fetcher is dropped.
struct ObjectStorePageFetcher {
    store: Arc<dyn ObjectStore>,
    provider: &'static str,
    root: ObjectStorageResult<Option<Path>>,
    prefix: String,
    page_size: usize,
    request_timeout: Duration,
    rate_limiter: Option<Arc<RateLimiter>>,
    receiver: OnceCell<ListingReceiver>,
}

impl ObjectStorePageFetcher {
    fn spawn_listing(&self, root: Option<Path>) -> ListingReceiver {
        let (sender, receiver) = async_channel::bounded(self.page_size);
        let store = self.store.clone();
        let prefix = self.prefix.clone();

        tokio::spawn(async move {
            let mut stream = store.list(root.as_ref());
            while let Some(item) = stream.next().await {
                let is_error = item.is_err();
                let outside_prefix = matches!(
                    &item,
                    Ok(meta) if !AsRef::<str>::as_ref(&meta.location).starts_with(prefix.as_str())
                );
                if outside_prefix {
                    continue;
                }
                if sender.send(item).await.is_err() {
                    debug!(prefix = prefix, "listing receiver dropped, stopping listing.");
                    return;
                }
                if is_error {
                    return;
                }
            }
        });

        receiver
    }

    async fn collect_page(&self, receiver: &ListingReceiver) -> ObjectStorageResult<ListingPage> {
        let mut objects = Vec::with_capacity(self.page_size);
        while let Ok(item) = receiver.recv().await {
            let meta = item.map_err(|e| {
                error!(
                    provider = self.provider,
                    prefix = self.prefix,
                    error = %e,
                    "{} list failed for prefix '{}': {}.",
                    self.provider,
                    self.prefix,
                    e,
                );
                classify_object_store_error(&e)
            })?;

            let key = meta.location.to_string();
            objects.push(object_meta_from_store(meta));
            if objects.len() >= self.page_size {
                return Ok(ListingPage::with_continuation(objects, key));
            }
        }

        Ok(ListingPage::last(objects))
    }
}

#[async_trait]
impl PageFetcher for ObjectStorePageFetcher {
    /// The continuation token is the last key of the previous page. It is
    /// informational only: paging resumes from the live listing.
    async fn fetch_page(
        &self,
        _continuation_token: Option<String>,
    ) -> ObjectStorageResult<ListingPage> {
        let root = self.root.clone()?;
        let receiver = self
            .receiver
            .get_or_init(|| async move { self.spawn_listing(root) })
            .await;
        exec_rate_limit_objects_per_sec_n(&self.rate_limiter, 1).await;

        with_request_timeout("list", self.request_timeout, self.collect_page(receiver)).await
    }
}
