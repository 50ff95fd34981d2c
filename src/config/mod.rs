pub mod args;

use std::time::Duration;

use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use chrono::{DateTime, Utc};

use crate::types::{ClientConfigLocation, ObjectStoragePath, S3Credentials};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_REQUEST_TIMEOUT_MILLISECONDS: u64 = 60_000;
pub const DEFAULT_SINGLE_DELETE_FALLBACK_RETRIES: u32 = 0;

/// Configuration of one command-line invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub operation: Operation,
    pub target: ObjectStoragePath,
    pub options: ObjClientOptions,
    pub client_config: ClientConfig,
    pub tracing_config: Option<TracingConfig>,
}

/// The single client operation a command-line invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Head,
    List,
    Delete,
    DeleteRecursively {
        expiration_time: Option<DateTime<Utc>>,
    },
    LifeCycle,
    Versioning,
}

/// Options controlling batch behaviour of listing and deletion.
///
/// `batch_size` is clamped to the backend's hard cap at use time, so a value
/// larger than the cap is accepted and simply has no effect above it.
///
/// ```
/// use objrecycle_rs::ObjClientOptions;
///
/// let options = ObjClientOptions {
///     batch_size: 5000,
///     ..Default::default()
/// };
/// assert_eq!(options.effective_batch_size(1000), 1000);
/// assert_eq!(options.effective_batch_size(256), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjClientOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    /// Number of single-object delete attempts made for each key whose
    /// batch delete failed with a retryable per-key error. Zero reports such
    /// keys as failed right away.
    pub single_delete_fallback_retries: u32,
}

impl ObjClientOptions {
    pub fn effective_batch_size(&self, backend_cap: usize) -> usize {
        self.batch_size.clamp(1, backend_cap.max(1))
    }

    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

impl Default for ObjClientOptions {
    fn default() -> Self {
        ObjClientOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MILLISECONDS),
            single_delete_fallback_retries: DEFAULT_SINGLE_DELETE_FALLBACK_RETRIES,
        }
    }
}

/// AWS S3 client configuration.
///
/// Endpoint and credentials are supplied by the caller; this crate does not
/// rotate credentials.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
    /// Objects-per-second ceiling shared by every operation of one client.
    pub rate_limit_objects: Option<u32>,
}

impl ClientConfig {
    /// A configuration using the default credential chain and no endpoint
    /// override.
    pub fn from_environment(region: Option<String>) -> Self {
        ClientConfig {
            client_config_location: ClientConfigLocation::default(),
            credential: S3Credentials::FromEnvironment,
            region,
            endpoint_url: None,
            force_path_style: false,
            retry_config: RetryConfig::default(),
            cli_timeout_config: CLITimeoutConfig::default(),
            disable_stalled_stream_protection: false,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
            rate_limit_objects: None,
        }
    }
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            aws_max_attempts: 10,
            initial_backoff_milliseconds: 100,
        }
    }
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone, Default)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Configuration of an `object_store` backed client.
#[derive(Debug, Clone)]
pub enum ObjectStoreConfig {
    Azure {
        account_name: String,
        container_name: String,
        /// Storage account key. If None, the default Azure credential chain is used.
        account_key: Option<String>,
        /// Custom endpoint for sovereign clouds or Azurite.
        endpoint: Option<String>,
    },
    Gcs {
        bucket: String,
        /// Path to a service account JSON key; None uses application default credentials.
        service_account_path: Option<String>,
    },
    /// Non-persistent store, mostly useful for tests and dry runs.
    Memory { bucket: String },
}

impl ObjectStoreConfig {
    /// The bucket (or container) the store is bound to.
    pub fn bucket(&self) -> &str {
        match self {
            ObjectStoreConfig::Azure { container_name, .. } => container_name,
            ObjectStoreConfig::Gcs { bucket, .. } => bucket,
            ObjectStoreConfig::Memory { bucket } => bucket,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            ObjectStoreConfig::Azure { .. } => "azure",
            ObjectStoreConfig::Gcs { .. } => "gcs",
            ObjectStoreConfig::Memory { .. } => "memory",
        }
    }
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
