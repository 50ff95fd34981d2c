use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, ObjClientOptions, Operation, RetryConfig,
    TracingConfig,
};
use crate::types::{AccessKeys, ClientConfigLocation, ObjectStoragePath, S3Credentials};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use chrono::{DateTime, Utc};
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_MAX_CONCURRENCY: usize = crate::config::DEFAULT_MAX_CONCURRENCY;
const DEFAULT_BATCH_SIZE: usize = crate::config::DEFAULT_BATCH_SIZE;
const DEFAULT_REQUEST_TIMEOUT_MILLISECONDS: u64 =
    crate::config::DEFAULT_REQUEST_TIMEOUT_MILLISECONDS;
const DEFAULT_SINGLE_DELETE_FALLBACK_RETRIES: u32 =
    crate::config::DEFAULT_SINGLE_DELETE_FALLBACK_RETRIES;
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_INVALID_TARGET: &str =
    "Target must be an S3 path starting with 's3://' (e.g., s3://bucket/prefix).";
const ERROR_MESSAGE_MAX_CONCURRENCY_ZERO: &str = "Max concurrency must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
const ERROR_MESSAGE_REQUEST_TIMEOUT_ZERO: &str = "Request timeout must be at least 1 millisecond.";
const ERROR_MESSAGE_SECRET_KEY_MISSING: &str =
    "--target-secret-key is required when --target-access-key is given.";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_s3_target(s: &str) -> Result<String, String> {
    if s.starts_with("s3://") && s.len() > 5 {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_INVALID_TARGET.to_string())
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// objrecycle - object storage access tool for the stale data recycler.
///
/// Inspect and reclaim objects in S3 and S3-compatible storage.
///
/// Example:
///   objrecycle head s3://my-bucket/data/segment-0001
///   objrecycle rm-recursive s3://my-bucket/logs/2023/ --expiration-time 2024-01-01T00:00:00Z
///   objrecycle lifecycle s3://my-bucket -vv
#[derive(Parser, Clone, Debug)]
#[command(name = "objrecycle", version, about, long_about = None)]
pub struct CLIArgs {
    #[command(subcommand)]
    pub command: Command,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, global = true, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, global = true, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Timeout in milliseconds for each individual backend request. Default: 60000.
    #[arg(long, env, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_MILLISECONDS, help_heading = "Performance")]
    pub request_timeout_milliseconds: u64,

    /// Maximum objects per second for rate limiting.
    #[arg(long, env, global = true, help_heading = "Performance")]
    pub rate_limit_objects: Option<u32>,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum retry attempts for AWS SDK operations. Default: 10.
    #[arg(long, env, global = true, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for retries. Default: 100.
    #[arg(long, env, global = true, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall SDK operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt SDK operation timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Read timeout in milliseconds.
    #[arg(long, env, global = true, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS config file path.
    #[arg(long, env, global = true, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    /// AWS shared credentials file path.
    #[arg(long, env, global = true, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    /// AWS profile for the target. If not set, uses the default profile.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_profile: Option<String>,

    /// AWS access key ID for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), conflicts_with = "target_profile", help_heading = "AWS")]
    pub target_access_key: Option<String>,

    /// AWS secret access key for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_secret_key: Option<String>,

    /// AWS session token for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_session_token: Option<String>,

    /// AWS region for the target.
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO, Wasabi).
    #[arg(long, env, global = true, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, global = true, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, global = true, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Show the metadata of a single object.
    Head(TargetArgs),
    /// List every object under a prefix.
    Ls(TargetArgs),
    /// Delete a single object. Deleting an absent object succeeds.
    Rm(TargetArgs),
    /// Delete every object under a prefix, optionally only those older than a cutoff.
    RmRecursive(RecursiveDeleteArgs),
    /// Show the shortest expiration (in days) of the bucket's lifecycle rules.
    Lifecycle(TargetArgs),
    /// Show the versioning status of the bucket.
    Versioning(TargetArgs),
}

#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    /// S3 target path: s3://<BUCKET_NAME>[/key]
    #[arg(help = "s3://<BUCKET_NAME>[/key]", value_parser = check_s3_target)]
    pub target: String,

    /// Page size for listings (clamped to the backend's limit). Default: 1000.
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Listing")]
    pub batch_size: usize,
}

#[derive(Args, Clone, Debug)]
pub struct RecursiveDeleteArgs {
    /// S3 target prefix: s3://<BUCKET_NAME>[/prefix]
    #[arg(help = "s3://<BUCKET_NAME>[/prefix]", value_parser = check_s3_target)]
    pub target: String,

    /// Delete only objects last modified strictly before this time (RFC 3339).
    #[arg(
        long,
        env,
        help_heading = "Deletion",
        long_help = r#"Delete only objects last modified strictly before given time (RFC3339 datetime).
Objects modified at or after this time are kept.
Example: 2023-02-19T12:00:00Z"#
    )]
    pub expiration_time: Option<DateTime<Utc>>,

    /// Number of objects per batch deletion request (clamped to the backend's limit). Default: 1000.
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Deletion")]
    pub batch_size: usize,

    /// Number of batch delete requests in flight at once. Default: 16.
    #[arg(long, env, default_value_t = DEFAULT_MAX_CONCURRENCY, help_heading = "Deletion")]
    pub max_concurrency: usize,

    /// Single-object delete attempts for keys whose batch delete failed with a retryable error.
    #[arg(long, env, default_value_t = DEFAULT_SINGLE_DELETE_FALLBACK_RETRIES, help_heading = "Deletion")]
    pub single_delete_fallback_retries: u32,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use objrecycle_rs::config::args::{Command, parse_from_args};
///
/// let args = vec!["objrecycle", "rm-recursive", "s3://my-bucket/logs/", "--batch-size", "500"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(matches!(cli_args.command, Command::RmRecursive(ref a) if a.batch_size == 500));
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.request_timeout_milliseconds == 0 {
            return Err(ERROR_MESSAGE_REQUEST_TIMEOUT_ZERO.to_string());
        }
        if self.target_access_key.is_some() && self.target_secret_key.is_none() {
            return Err(ERROR_MESSAGE_SECRET_KEY_MISSING.to_string());
        }
        match &self.command {
            Command::RmRecursive(args) => {
                if args.batch_size == 0 {
                    return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
                }
                if args.max_concurrency == 0 {
                    return Err(ERROR_MESSAGE_MAX_CONCURRENCY_ZERO.to_string());
                }
            }
            Command::Head(args)
            | Command::Ls(args)
            | Command::Rm(args)
            | Command::Lifecycle(args)
            | Command::Versioning(args) => {
                if args.batch_size == 0 {
                    return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
                }
            }
        }
        Ok(())
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            let secret_key = self.target_secret_key.clone().unwrap_or_default();
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: secret_key,
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
            rate_limit_objects: self.rate_limit_objects,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn build_options(&self) -> ObjClientOptions {
        let request_timeout = Duration::from_millis(self.request_timeout_milliseconds);
        match &self.command {
            Command::RmRecursive(args) => ObjClientOptions {
                batch_size: args.batch_size,
                max_concurrency: args.max_concurrency,
                request_timeout,
                single_delete_fallback_retries: args.single_delete_fallback_retries,
            },
            Command::Head(args)
            | Command::Ls(args)
            | Command::Rm(args)
            | Command::Lifecycle(args)
            | Command::Versioning(args) => ObjClientOptions {
                batch_size: args.batch_size,
                request_timeout,
                ..Default::default()
            },
        }
    }

    fn target_uri(&self) -> &str {
        match &self.command {
            Command::RmRecursive(args) => &args.target,
            Command::Head(args)
            | Command::Ls(args)
            | Command::Rm(args)
            | Command::Lifecycle(args)
            | Command::Versioning(args) => &args.target,
        }
    }

    fn parse_target(&self) -> Result<ObjectStoragePath, String> {
        ObjectStoragePath::parse_uri(self.target_uri())
            .ok_or_else(|| ERROR_MESSAGE_INVALID_TARGET.to_string())
    }

    fn operation(&self) -> Operation {
        match &self.command {
            Command::Head(_) => Operation::Head,
            Command::Ls(_) => Operation::List,
            Command::Rm(_) => Operation::Delete,
            Command::RmRecursive(args) => Operation::DeleteRecursively {
                expiration_time: args.expiration_time,
            },
            Command::Lifecycle(_) => Operation::LifeCycle,
            Command::Versioning(_) => Operation::Versioning,
        }
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        Ok(Config {
            operation: args.operation(),
            target: args.parse_target()?,
            options: args.build_options(),
            client_config: args.build_client_config(),
            tracing_config: args.build_tracing_config(),
        })
    }
}
