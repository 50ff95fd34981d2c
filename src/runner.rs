//! Executes one [`Operation`] against an [`ObjStorageClient`] and prints its
//! result, one record per line.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{Config, Operation};
use crate::storage::ObjStorageClient;
use crate::types::error::ObjRecycleError;
use crate::types::{ObjectMeta, ObjectStorageResponse};

fn format_object(object: &ObjectMeta) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        object.last_modified.to_rfc3339(),
        object.size,
        object.e_tag.as_deref().unwrap_or("-"),
        object.key
    )
}

fn check(response: ObjectStorageResponse) -> Result<ObjectStorageResponse> {
    if response.is_ok() {
        Ok(response)
    } else {
        Err(ObjRecycleError::from(response).into())
    }
}

/// Run the operation of `config` against its target and write the outcome
/// to `writer`.
///
/// A non-OK response becomes an [`ObjRecycleError`] inside the returned
/// error, so callers can map it to an exit code.
pub async fn run_operation<W: Write>(
    client: &dyn ObjStorageClient,
    config: &Config,
    writer: &mut W,
) -> Result<()> {
    let target = &config.target;
    debug!(
        backend = client.backend_name(),
        bucket = target.bucket,
        key = target.key,
        operation = ?config.operation,
        "operation has started."
    );

    match config.operation {
        Operation::Head => {
            let object = client
                .head_object(target)
                .await
                .map_err(ObjRecycleError::from)?;
            writeln!(writer, "{}", format_object(&object))?;
        }
        Operation::List => {
            let mut listing = client.list_objects(target, &config.options);
            let mut count: usize = 0;
            while let Some(object) = listing.next().await {
                let object = object.map_err(ObjRecycleError::from)?;
                writeln!(writer, "{}", format_object(&object))?;
                count += 1;
            }
            debug!(
                object_count = count,
                pages = listing.pages_fetched(),
                "listing has been completed."
            );
        }
        Operation::Delete => {
            check(client.delete_object(target).await)?;
            writeln!(writer, "deleted: {target}")?;
        }
        Operation::DeleteRecursively { expiration_time } => {
            let response = client
                .delete_objects_recursively(target, &config.options, expiration_time)
                .await;
            info!(
                bucket = target.bucket,
                prefix = target.key,
                deleted = response.deleted.len(),
                failed = response.failed.len(),
                "recursive deletion has finished."
            );
            let response = check(response)?;
            writeln!(writer, "deleted {} objects.", response.deleted.len())?;
        }
        Operation::LifeCycle => {
            let days = client
                .get_life_cycle(&target.bucket)
                .await
                .map_err(ObjRecycleError::from)?;
            writeln!(writer, "{days}")?;
        }
        Operation::Versioning => {
            let status = client
                .check_versioning(&target.bucket)
                .await
                .map_err(ObjRecycleError::from)?;
            writeln!(writer, "{status}")?;
        }
    }

    writer.flush().context("failed to flush output.")
}
