use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use super::*;
use crate::config::ObjClientOptions;
use crate::filters::FilterChain;
use crate::lister::ObjectListIterator;
use crate::lister::tests::MockPageFetcher;
use crate::test_utils::{init_dummy_tracing_subscriber, make_object_meta, make_test_options};
use crate::types::response::ERROR_CODE_CANCELLED;
use crate::types::token::create_deletion_cancellation_token;
use crate::types::{ListingPage, Outcome};

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// A mock batch delete backend that records every request.
#[derive(Clone)]
struct MockBatchDelete {
    max_batch_size: usize,
    batch_calls: Arc<Mutex<Vec<Vec<String>>>>,
    single_calls: Arc<Mutex<Vec<String>>>,
    /// Keys reported as per-key failures, mapped to error code.
    batch_error_keys: Arc<Mutex<HashMap<String, String>>>,
    /// A chunk containing this key fails as a whole.
    failing_chunk_key: Arc<Mutex<Option<String>>>,
    /// Remaining single delete failures per key.
    single_failures: Arc<Mutex<HashMap<String, usize>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockBatchDelete {
    fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            batch_calls: Arc::new(Mutex::new(Vec::new())),
            single_calls: Arc::new(Mutex::new(Vec::new())),
            batch_error_keys: Arc::new(Mutex::new(HashMap::new())),
            failing_chunk_key: Arc::new(Mutex::new(None)),
            single_failures: Arc::new(Mutex::new(HashMap::new())),
            delay: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn fail_key(&self, key: &str, code: &str) {
        self.batch_error_keys
            .lock()
            .unwrap()
            .insert(key.to_string(), code.to_string());
    }

    fn fail_chunk_containing(&self, key: &str) {
        *self.failing_chunk_key.lock().unwrap() = Some(key.to_string());
    }

    fn fail_single(&self, key: &str, times: usize) {
        self.single_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
    }

    fn batch_call_count(&self) -> usize {
        self.batch_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BatchDelete for MockBatchDelete {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn delete_batch(
        &self,
        _bucket: &str,
        keys: &[String],
    ) -> ObjectStorageResult<DeleteResult> {
        assert!(keys.len() <= self.max_batch_size);
        self.batch_calls.lock().unwrap().push(keys.to_vec());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(key) = self.failing_chunk_key.lock().unwrap().as_ref() {
            if keys.contains(key) {
                return Err(ObjectStorageResponse::retryable("service unavailable")
                    .with_error_code("ServiceUnavailable")
                    .with_http_status(503));
            }
        }

        let error_keys = self.batch_error_keys.lock().unwrap();
        let mut result = DeleteResult::default();
        for key in keys {
            match error_keys.get(key) {
                Some(code) => result.failed.push(FailedKey {
                    key: key.clone(),
                    outcome: if is_retryable_error_code(code) {
                        Outcome::RetryableError
                    } else {
                        Outcome::PermanentError
                    },
                    error_code: code.clone(),
                    error_message: format!("{code} for {key}"),
                }),
                None => result.deleted.push(key.clone()),
            }
        }
        Ok(result)
    }

    async fn delete_one(&self, _bucket: &str, key: &str) -> ObjectStorageResponse {
        self.single_calls.lock().unwrap().push(key.to_string());

        let mut failures = self.single_failures.lock().unwrap();
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                ObjectStorageResponse::retryable("slow down").with_error_code("SlowDown")
            }
            _ => ObjectStorageResponse::ok(),
        }
    }
}

fn keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key{i:05}")).collect()
}

fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

fn make_deleter(backend: &MockBatchDelete, options: ObjClientOptions) -> BatchDeleter {
    BatchDeleter::new(
        Arc::new(backend.clone()),
        options,
        create_deletion_cancellation_token(),
    )
}

// ---------------------------------------------------------------------------
// DeleteResult
// ---------------------------------------------------------------------------

#[test]
fn all_failed_copies_request_classification() {
    let response = ObjectStorageResponse::retryable("timed out");
    let result = DeleteResult::all_failed(vec!["a".to_string(), "b".to_string()], &response);

    assert!(result.deleted.is_empty());
    assert_eq!(result.failed.len(), 2);
    assert!(result.failed.iter().all(|f| f.is_retryable()));
    assert!(result.failed.iter().all(|f| f.error_code == "unknown"));
}

#[test]
fn retryable_error_codes() {
    assert!(is_retryable_error_code("SlowDown"));
    assert!(is_retryable_error_code("InternalError"));
    assert!(is_retryable_error_code("unknown"));
    assert!(!is_retryable_error_code("AccessDenied"));
    assert!(!is_retryable_error_code("NoSuchBucket"));
}

// ---------------------------------------------------------------------------
// delete_keys
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_keys_uses_ceil_of_batch_count() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(1000, 4));

    let response = deleter.delete_keys("bucket", keys(2500)).await;

    assert!(response.is_ok());
    assert_eq!(response.deleted.len(), 2500);
    assert_eq!(backend.batch_call_count(), 3);
    assert_eq!(sorted(response.deleted), keys(2500));
}

#[tokio::test]
async fn delete_keys_clamps_batch_size_to_backend_cap() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(256);
    let deleter = make_deleter(&backend, make_test_options(5000, 2));
    assert_eq!(deleter.effective_batch_size(), 256);

    let response = deleter.delete_keys("bucket", keys(600)).await;

    assert!(response.is_ok());
    let calls = backend.batch_calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.len() <= 256));
}

#[tokio::test]
async fn delete_keys_without_keys_sends_nothing() {
    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(1000, 4));

    let response = deleter.delete_keys("bucket", vec![]).await;

    assert!(response.is_ok());
    assert_eq!(backend.batch_call_count(), 0);
}

#[tokio::test]
async fn per_key_permanent_failure() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_key("key00001", "AccessDenied");
    let deleter = make_deleter(&backend, make_test_options(1000, 1));

    let response = deleter.delete_keys("bucket", keys(3)).await;

    assert_eq!(response.outcome, Outcome::PermanentError);
    assert_eq!(response.failed.len(), 1);
    assert_eq!(response.failed[0].key, "key00001");
    assert_eq!(response.failed[0].error_code, "AccessDenied");
    assert_eq!(
        sorted(response.deleted),
        vec!["key00000".to_string(), "key00002".to_string()]
    );
}

#[tokio::test]
async fn retryable_failure_dominates_permanent() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_key("key00000", "AccessDenied");
    backend.fail_key("key00001", "SlowDown");
    let deleter = make_deleter(&backend, make_test_options(1000, 1));

    let response = deleter.delete_keys("bucket", keys(4)).await;

    assert_eq!(response.outcome, Outcome::RetryableError);
    assert_eq!(response.failed.len(), 2);
    assert_eq!(response.deleted.len(), 2);
}

#[tokio::test]
async fn failed_chunk_reports_exactly_its_keys() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_chunk_containing("c");
    let deleter = make_deleter(&backend, make_test_options(2, 3));

    let all: Vec<String> = ["a", "b", "c", "d", "e", "f"]
        .iter()
        .map(|k| k.to_string())
        .collect();
    let response = deleter.delete_keys("bucket", all).await;

    assert_eq!(response.outcome, Outcome::RetryableError);
    let failed: Vec<String> = sorted(response.failed.iter().map(|f| f.key.clone()).collect());
    assert_eq!(failed, vec!["c".to_string(), "d".to_string()]);
    assert!(
        response
            .failed
            .iter()
            .all(|f| f.error_code == "ServiceUnavailable")
    );
    assert_eq!(
        sorted(response.deleted),
        vec![
            "a".to_string(),
            "b".to_string(),
            "e".to_string(),
            "f".to_string()
        ]
    );
}

#[tokio::test]
async fn request_timeout_fails_the_chunk_as_retryable() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000).with_delay(Duration::from_secs(5));
    let options = ObjClientOptions {
        request_timeout: Duration::from_millis(20),
        ..make_test_options(1000, 1)
    };
    let deleter = make_deleter(&backend, options);

    let response = deleter.delete_keys("bucket", keys(2)).await;

    assert_eq!(response.outcome, Outcome::RetryableError);
    assert_eq!(response.failed.len(), 2);
    assert!(response.failed.iter().all(|f| f.error_code == "RequestTimeout"));
}

#[tokio::test]
async fn concurrency_is_bounded() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000).with_delay(Duration::from_millis(20));
    let deleter = make_deleter(&backend, make_test_options(1, 2));

    let response = deleter.delete_keys("bucket", keys(8)).await;

    assert!(response.is_ok());
    assert_eq!(backend.batch_call_count(), 8);
    assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 2);
}

// ---------------------------------------------------------------------------
// Single delete fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fallback_recovers_retryable_key() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_key("key00001", "SlowDown");
    backend.fail_key("key00002", "AccessDenied");
    let options = ObjClientOptions {
        single_delete_fallback_retries: 2,
        ..make_test_options(1000, 1)
    };
    let deleter = make_deleter(&backend, options);

    let response = deleter.delete_keys("bucket", keys(3)).await;

    // The permanent failure is not retried.
    assert_eq!(response.outcome, Outcome::PermanentError);
    assert_eq!(response.failed.len(), 1);
    assert_eq!(response.failed[0].key, "key00002");
    assert!(response.deleted.contains(&"key00001".to_string()));
    assert_eq!(
        *backend.single_calls.lock().unwrap(),
        vec!["key00001".to_string()]
    );
}

#[tokio::test]
async fn fallback_gives_up_after_configured_attempts() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_key("key00000", "SlowDown");
    backend.fail_single("key00000", 10);
    let options = ObjClientOptions {
        single_delete_fallback_retries: 2,
        ..make_test_options(1000, 1)
    };
    let deleter = make_deleter(&backend, options);

    let response = deleter.delete_keys("bucket", keys(1)).await;

    assert_eq!(response.outcome, Outcome::RetryableError);
    assert_eq!(response.failed.len(), 1);
    assert_eq!(response.failed[0].error_code, "SlowDown");
    assert_eq!(backend.single_calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn fallback_disabled_by_default() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    backend.fail_key("key00000", "SlowDown");
    let deleter = make_deleter(&backend, make_test_options(1000, 1));

    let response = deleter.delete_keys("bucket", keys(1)).await;

    assert!(response.is_retryable());
    assert!(backend.single_calls.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000);
    let token = create_deletion_cancellation_token();
    token.cancel();
    let deleter = BatchDeleter::new(
        Arc::new(backend.clone()),
        make_test_options(10, 2),
        token,
    );

    let response = deleter.delete_keys("bucket", keys(100)).await;

    assert!(response.is_retryable());
    assert_eq!(response.error_code.as_deref(), Some(ERROR_CODE_CANCELLED));
    assert_eq!(backend.batch_call_count(), 0);
    assert!(response.deleted.is_empty());
}

#[tokio::test]
async fn cancellation_stops_further_chunks() {
    init_dummy_tracing_subscriber();

    let backend = MockBatchDelete::new(1000).with_delay(Duration::from_millis(50));
    let token = create_deletion_cancellation_token();
    let deleter = BatchDeleter::new(
        Arc::new(backend.clone()),
        make_test_options(1, 1),
        token.clone(),
    );

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(75)).await;
        token.cancel();
    });
    let response = deleter.delete_keys("bucket", keys(50)).await;
    canceller.await.unwrap();

    assert!(response.is_cancelled());
    assert!(backend.batch_call_count() < 50);
    // Chunks already sent ran to completion.
    assert_eq!(response.deleted.len(), backend.batch_call_count());
}

// ---------------------------------------------------------------------------
// delete_listed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_listed_honours_expiration_time() {
    init_dummy_tracing_subscriber();

    let objects = [("a", 10), ("b", 20), ("c", 30), ("d", 40), ("e", 50)]
        .iter()
        .map(|(k, t)| make_object_meta(&format!("logs/2023/{k}"), *t))
        .collect();
    let listing = ObjectListIterator::new(Box::new(MockPageFetcher::paged(objects, 2)));

    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(1000, 2));

    let response = deleter
        .delete_listed(
            "bucket",
            listing,
            FilterChain::for_expiration_time(Some(Utc.timestamp_opt(25, 0).unwrap())),
        )
        .await;

    assert!(response.is_ok());
    assert_eq!(
        sorted(response.deleted),
        vec!["logs/2023/a".to_string(), "logs/2023/b".to_string()]
    );
    let requested: Vec<String> = backend
        .batch_calls
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .cloned()
        .collect();
    assert_eq!(sorted(requested), vec!["logs/2023/a", "logs/2023/b"]);
}

#[tokio::test]
async fn delete_listed_without_expiration_deletes_everything() {
    init_dummy_tracing_subscriber();

    let objects: Vec<_> = keys(25).iter().map(|k| make_object_meta(k, 1)).collect();
    let listing = ObjectListIterator::new(Box::new(MockPageFetcher::paged(objects, 7)));

    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(10, 2));

    let response = deleter
        .delete_listed("bucket", listing, FilterChain::for_expiration_time(None))
        .await;

    assert!(response.is_ok());
    assert_eq!(sorted(response.deleted), keys(25));
    assert_eq!(backend.batch_call_count(), 3);
}

#[tokio::test]
async fn delete_listed_empty_listing() {
    let listing = ObjectListIterator::new(Box::new(MockPageFetcher::paged(vec![], 10)));
    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(10, 2));

    let response = deleter
        .delete_listed("bucket", listing, FilterChain::for_expiration_time(None))
        .await;

    assert!(response.is_ok());
    assert!(response.deleted.is_empty());
    assert_eq!(backend.batch_call_count(), 0);
}

#[tokio::test]
async fn listing_error_is_aggregated_after_deleting_listed_keys() {
    init_dummy_tracing_subscriber();

    let fetcher = MockPageFetcher::new(vec![
        Ok(ListingPage::with_continuation(
            vec![make_object_meta("a", 1), make_object_meta("b", 1)],
            "1".to_string(),
        )),
        Err(ObjectStorageResponse::retryable("listing throttled").with_error_code("SlowDown")),
    ]);
    let listing = ObjectListIterator::new(Box::new(fetcher));

    let backend = MockBatchDelete::new(1000);
    let deleter = make_deleter(&backend, make_test_options(1000, 1));

    let response = deleter
        .delete_listed("bucket", listing, FilterChain::for_expiration_time(None))
        .await;

    assert_eq!(response.outcome, Outcome::RetryableError);
    assert_eq!(response.error_code.as_deref(), Some("SlowDown"));
    assert!(response.message.contains("listing throttled"));
    assert_eq!(
        sorted(response.deleted),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test]
async fn delete_listed_cancelled_before_listing() {
    init_dummy_tracing_subscriber();

    let fetcher = MockPageFetcher::paged(vec![make_object_meta("a", 1)], 10);
    let calls = fetcher.calls.clone();
    let listing = ObjectListIterator::new(Box::new(fetcher));

    let backend = MockBatchDelete::new(1000);
    let token = create_deletion_cancellation_token();
    token.cancel();
    let deleter = BatchDeleter::new(Arc::new(backend.clone()), make_test_options(10, 1), token);

    let response = deleter
        .delete_listed("bucket", listing, FilterChain::for_expiration_time(None))
        .await;

    assert!(response.is_cancelled());
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(backend.batch_call_count(), 0);
}

// ---------------------------------------------------------------------------
// Property-based tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn batch_call_count_is_ceil(
        key_count in 0usize..3000,
        batch_size in 1usize..1500,
        max_concurrency in 1usize..8,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let backend = MockBatchDelete::new(1000);
            let deleter = make_deleter(&backend, make_test_options(batch_size, max_concurrency));

            let response = deleter.delete_keys("bucket", keys(key_count)).await;

            let effective = batch_size.min(1000);
            prop_assert!(response.is_ok());
            prop_assert_eq!(backend.batch_call_count(), key_count.div_ceil(effective));
            prop_assert_eq!(sorted(response.deleted), keys(key_count));
            Ok(())
        })?;
    }

    #[test]
    fn failed_and_deleted_partition_the_input(
        key_count in 1usize..200,
        failing in proptest::collection::vec(0usize..200, 0..20),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let backend = MockBatchDelete::new(1000);
            for index in &failing {
                if *index < key_count {
                    backend.fail_key(&format!("key{index:05}"), "AccessDenied");
                }
            }
            let deleter = make_deleter(&backend, make_test_options(16, 3));

            let response = deleter.delete_keys("bucket", keys(key_count)).await;

            let mut all = response.deleted.clone();
            all.extend(response.failed.iter().map(|f| f.key.clone()));
            prop_assert_eq!(sorted(all), keys(key_count));
            prop_assert_eq!(response.is_ok(), response.failed.is_empty());
            Ok(())
        })?;
    }
}
