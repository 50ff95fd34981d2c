use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod response;
pub mod token;

pub use response::{FailedKey, ObjectStorageResponse, ObjectStorageResult, Outcome};

/// Identifies an object (or a key prefix) inside a bucket.
///
/// For listing and recursive deletion `key` is interpreted as a raw string
/// prefix: `logs/20` matches `logs/2023/a` as well as `logs/2024/b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectStoragePath {
    pub bucket: String,
    pub key: String,
}

impl ObjectStoragePath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an `s3://bucket/key` style URI.
    ///
    /// The scheme itself is not checked beyond the `://` separator, so
    /// `az://container/prefix` and `gs://bucket/prefix` are accepted as well.
    pub fn parse_uri(uri: &str) -> Option<Self> {
        let (_, without_scheme) = uri.split_once("://")?;
        let (bucket, key) = match without_scheme.find('/') {
            Some(idx) => (&without_scheme[..idx], &without_scheme[idx + 1..]),
            None => (without_scheme, ""),
        };
        if bucket.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectStoragePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata of a stored object, produced by `head_object` and by listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

impl ObjectMeta {
    /// True when the object was last modified strictly before `cutoff`.
    pub fn is_modified_before(&self, cutoff: &DateTime<Utc>) -> bool {
        self.last_modified < *cutoff
    }
}

/// One page of a listing.
///
/// `continuation_token` is `None` whenever `has_more` is false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub objects: Vec<ObjectMeta>,
    pub has_more: bool,
    pub continuation_token: Option<String>,
}

impl ListingPage {
    pub fn last(objects: Vec<ObjectMeta>) -> Self {
        Self {
            objects,
            has_more: false,
            continuation_token: None,
        }
    }

    pub fn with_continuation(objects: Vec<ObjectMeta>, continuation_token: String) -> Self {
        Self {
            objects,
            has_more: true,
            continuation_token: Some(continuation_token),
        }
    }
}

/// Bucket versioning state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
    /// Versioning has never been enabled on the bucket.
    Disabled,
}

impl VersioningStatus {
    pub fn is_enabled(&self) -> bool {
        matches!(self, VersioningStatus::Enabled)
    }
}

impl fmt::Display for VersioningStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersioningStatus::Enabled => "Enabled",
            VersioningStatus::Suspended => "Suspended",
            VersioningStatus::Disabled => "Disabled",
        };
        f.write_str(s)
    }
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// Credential sources accepted when constructing an S3 client.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair with secure zeroization.
///
/// The secret_access_key and session_token are cleared from memory when this
/// struct is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
