/*!
# Overview
objrecycle-rs is the object storage access layer of a stale data recycler.
It gives the recycler one put / head / list / delete contract over Amazon S3
(and S3-compatible stores), Azure Blob Storage and Google Cloud Storage.

## Features
- **Uniform Client**: one async [`ObjStorageClient`] trait per provider
- **Lazy Listing**: [`ObjectListIterator`] fetches one page at a time
- **Batched Deletion**: keys are chunked to the provider's batch cap and deleted concurrently
- **Recursive Deletion**: delete everything under a prefix, optionally only objects older than an expiration time
- **Retry Classification**: every failure is either a `RetryableError` or a `PermanentError`
- **Partial Failures**: batch results list every failed key with its own classification

## As a Library
The `objrecycle` CLI is a thin wrapper over this library.

Example usage
=============

```toml
[dependencies]
objrecycle-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use chrono::{Duration, Utc};
use objrecycle_rs::{
    ClientConfig, ObjClientOptions, ObjStorageClient, ObjectStoragePath,
    create_deletion_cancellation_token, create_s3_client,
};

#[tokio::main]
async fn main() {
    let options = ObjClientOptions::default();
    let client = create_s3_client(
        &ClientConfig::from_environment(Some("us-east-1".to_string())),
        options,
        create_deletion_cancellation_token(),
    )
    .await;

    let response = client
        .delete_objects_recursively(
            &ObjectStoragePath::new("my-bucket", "logs/2023/"),
            &options,
            Some(Utc::now() - Duration::days(30)),
        )
        .await;

    if !response.is_ok() {
        eprintln!("{} keys failed: {}", response.failed.len(), response.message);
    }
}
```
*/

pub mod config;
pub mod deleter;
pub mod filters;
pub mod lister;
pub mod runner;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::args::CLIArgs;
pub use config::{ClientConfig, Config, ObjClientOptions, ObjectStoreConfig, Operation};
pub use lister::ObjectListIterator;
pub use runner::run_operation;
pub use storage::{ObjStorage, ObjStorageClient, create_object_store_client, create_s3_client};
pub use types::error::{ObjRecycleError, exit_code_from_error, is_cancelled_error};
pub use types::token::{DeletionCancellationToken, create_deletion_cancellation_token};
pub use types::{
    FailedKey, ObjectMeta, ObjectStoragePath, ObjectStorageResponse, ObjectStorageResult,
    Outcome, VersioningStatus,
};
