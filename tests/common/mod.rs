//! Shared E2E test infrastructure for objrecycle-rs.
//!
//! `MemoryTestHelper` runs against the in-memory `object_store` backend and
//! needs no credentials. `TestHelper` (only with `--cfg e2e_test`) runs
//! against real AWS S3 using the `objrecycle-e2e-test` AWS profile.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use objrecycle_rs::{
    ObjClientOptions, ObjStorage, ObjStorageClient, ObjectStoragePath, ObjectStoreConfig,
    create_deletion_cancellation_token, create_object_store_client,
};

pub const E2E_TIMEOUT: Duration = Duration::from_secs(300);

/// Wrap an E2E test body in a timeout.
///
/// ```ignore
/// #[tokio::test]
/// async fn e2e_my_test() {
///     e2e_timeout!(async { /* ... */ });
/// }
/// ```
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}

/// Helper over a fresh in-memory store bound to one bucket.
pub struct MemoryTestHelper {
    pub bucket: String,
    pub client: ObjStorage,
}

impl MemoryTestHelper {
    pub fn new(options: ObjClientOptions) -> Self {
        Self::with_rate_limit(options, None)
    }

    pub fn with_rate_limit(options: ObjClientOptions, rate_limit_objects: Option<u32>) -> Self {
        let bucket = "e2e-bucket".to_string();
        let client = create_object_store_client(
            &ObjectStoreConfig::Memory {
                bucket: bucket.clone(),
            },
            rate_limit_objects,
            options,
            create_deletion_cancellation_token(),
        )
        .unwrap();

        Self { bucket, client }
    }

    pub fn path(&self, key: &str) -> ObjectStoragePath {
        ObjectStoragePath::new(&self.bucket, key)
    }

    pub async fn put_object(&self, key: &str, body: &'static [u8]) {
        let response = self
            .client
            .put_object(&self.path(key), Bytes::from_static(body))
            .await;
        assert!(response.is_ok(), "failed to put {key}: {response}");
    }

    pub async fn put_objects(&self, prefix: &str, count: usize) -> Vec<String> {
        let mut keys = Vec::with_capacity(count);
        for i in 0..count {
            let key = format!("{prefix}file{i:04}.dat");
            self.put_object(&key, b"data").await;
            keys.push(key);
        }
        keys
    }

    pub async fn list_keys(&self, prefix: &str) -> Vec<String> {
        self.client
            .list_objects(&self.path(prefix), &ObjClientOptions::default())
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect()
    }
}

#[cfg(e2e_test)]
pub use s3::{BucketGuard, TestHelper};

#[cfg(e2e_test)]
mod s3 {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use aws_config::BehaviorVersion;
    use aws_sdk_s3::Client;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
    use objrecycle_rs::types::S3Credentials;
    use objrecycle_rs::{
        ClientConfig, ObjClientOptions, ObjStorage, ObjStorageClient,
        create_deletion_cancellation_token,
        create_s3_client,
    };

    /// AWS profile used for all E2E tests.
    const AWS_PROFILE: &str = "objrecycle-e2e-test";
    const DEFAULT_REGION: &str = "us-east-1";

    static BUCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// RAII guard that deletes all objects and the bucket when dropped.
    pub struct BucketGuard {
        helper: Arc<TestHelper>,
        bucket: String,
    }

    impl Drop for BucketGuard {
        fn drop(&mut self) {
            let helper = self.helper.clone();
            let bucket = self.bucket.clone();
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(async move {
                        helper.delete_bucket_cascade(&bucket).await;
                    });
                });
            }));
        }
    }

    /// Wraps a raw S3 client for setup and verification, and builds
    /// objrecycle clients with the same profile.
    pub struct TestHelper {
        client: Client,
        region: String,
    }

    impl TestHelper {
        pub async fn new() -> Arc<Self> {
            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .profile_name(AWS_PROFILE)
                .load()
                .await;

            let region = sdk_config
                .region()
                .map(|r| r.to_string())
                .unwrap_or_else(|| DEFAULT_REGION.to_string());

            Arc::new(Self {
                client: Client::new(&sdk_config),
                region,
            })
        }

        pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
            BucketGuard {
                helper: Arc::clone(self),
                bucket: bucket.to_string(),
            }
        }

        /// Unique across parallel tests of one run and across runs.
        pub fn generate_bucket_name(&self) -> String {
            format!(
                "objrecycle-e2e-{}-{}-{}",
                chrono::Utc::now().timestamp_millis(),
                std::process::id(),
                BUCKET_COUNTER.fetch_add(1, Ordering::SeqCst)
            )
        }

        pub async fn create_bucket(&self, bucket: &str) {
            let mut builder = self.client.create_bucket().bucket(bucket);

            // us-east-1 must NOT specify a location constraint
            if self.region != "us-east-1" {
                let constraint = BucketLocationConstraint::from(self.region.as_str());
                let config = CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build();
                builder = builder.create_bucket_configuration(config);
            }

            builder
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
        }

        pub async fn delete_bucket_cascade(&self, bucket: &str) {
            let client = self.objrecycle_client(ObjClientOptions::default()).await;
            let _ = client
                .delete_objects_recursively(
                    &objrecycle_rs::ObjectStoragePath::new(bucket, ""),
                    &ObjClientOptions::default(),
                    None,
                )
                .await;
            let _ = self.client.delete_bucket().bucket(bucket).send().await;
        }

        pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body))
                .send()
                .await
                .unwrap_or_else(|e| panic!("Failed to put {key}: {e}"));
        }

        pub async fn count_objects(&self, bucket: &str, prefix: &str) -> usize {
            let mut count = 0;
            let mut continuation_token = None;
            loop {
                let output = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation_token)
                    .send()
                    .await
                    .unwrap();
                count += output.contents().len();
                if output.is_truncated() != Some(true) {
                    return count;
                }
                continuation_token = output.next_continuation_token().map(String::from);
            }
        }

        pub async fn objrecycle_client(&self, options: ObjClientOptions) -> ObjStorage {
            let client_config = ClientConfig {
                credential: S3Credentials::Profile(AWS_PROFILE.to_string()),
                ..ClientConfig::from_environment(Some(self.region.clone()))
            };
            create_s3_client(&client_config, options, create_deletion_cancellation_token()).await
        }
    }
}
