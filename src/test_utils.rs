//! Shared test utilities for the objrecycle library crate.

use chrono::{TimeZone, Utc};

use crate::config::ObjClientOptions;
use crate::types::ObjectMeta;

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create an [`ObjectMeta`] with the given key, last modified `mtime_secs`
/// seconds after the Unix epoch.
pub(crate) fn make_object_meta(key: &str, mtime_secs: i64) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: 1,
        last_modified: Utc
            .timestamp_opt(mtime_secs, 0)
            .single()
            .unwrap_or_default(),
        e_tag: None,
        version_id: None,
    }
}

/// Options with a small batch size and concurrency, suitable for tests that
/// count batch calls.
pub(crate) fn make_test_options(batch_size: usize, max_concurrency: usize) -> ObjClientOptions {
    ObjClientOptions {
        batch_size,
        max_concurrency,
        ..Default::default()
    }
}
