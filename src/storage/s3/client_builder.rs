use std::time::Duration;

use aws_config::meta::region::{ProvideRegion, RegionProviderChain};
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::retry::RetryConfig;
use aws_config::stalled_stream_protection::StalledStreamProtectionConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, ConfigLoader, Region, SdkConfig};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Builder, Credentials};

use crate::config::ClientConfig;
use crate::types::S3Credentials;

impl ClientConfig {
    /// Build an `aws_sdk_s3::Client` from this configuration.
    pub async fn create_client(&self) -> Client {
        let mut config_builder = Builder::from(&self.load_sdk_config().await)
            .force_path_style(self.force_path_style)
            .request_checksum_calculation(self.request_checksum_calculation);

        if let Some(timeout_config) = self.build_timeout_config() {
            config_builder = config_builder.timeout_config(timeout_config);
        }

        Client::from_conf(config_builder.build())
    }

    async fn load_sdk_config(&self) -> SdkConfig {
        let stalled_stream_protection = if self.disable_stalled_stream_protection {
            StalledStreamProtectionConfig::disabled()
        } else {
            StalledStreamProtectionConfig::enabled().build()
        };

        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .stalled_stream_protection(stalled_stream_protection)
            .region(self.build_region_provider())
            .retry_config(self.build_retry_config());

        if let Some(endpoint_url) = &self.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        config_loader = self.set_credentials_provider(config_loader);
        config_loader.load().await
    }

    fn set_credentials_provider(&self, config_loader: ConfigLoader) -> ConfigLoader {
        match &self.credential {
            S3Credentials::Credentials { access_keys } => {
                let credentials = Credentials::new(
                    access_keys.access_key.to_string(),
                    access_keys.secret_access_key.to_string(),
                    access_keys.session_token.clone(),
                    None,
                    "objrecycle",
                );
                config_loader.credentials_provider(credentials)
            }
            S3Credentials::Profile(profile_name) => {
                let mut builder = aws_config::profile::ProfileFileCredentialsProvider::builder()
                    .profile_name(profile_name);
                if let Some(profile_files) = self.build_profile_files() {
                    builder = builder.profile_files(profile_files);
                }
                config_loader.credentials_provider(builder.build())
            }
            S3Credentials::FromEnvironment => config_loader,
        }
    }

    fn build_profile_files(&self) -> Option<ProfileFiles> {
        let location = &self.client_config_location;
        if location.aws_config_file.is_none() && location.aws_shared_credentials_file.is_none() {
            return None;
        }

        let mut builder = ProfileFiles::builder();
        match &location.aws_config_file {
            Some(path) => builder = builder.with_file(ProfileFileKind::Config, path),
            None => builder = builder.include_default_config_file(true),
        }
        match &location.aws_shared_credentials_file {
            Some(path) => builder = builder.with_file(ProfileFileKind::Credentials, path),
            None => builder = builder.include_default_credentials_file(true),
        }
        Some(builder.build())
    }

    fn build_region_provider(&self) -> Box<dyn ProvideRegion> {
        let region = self.region.clone().map(Region::new);

        match &self.credential {
            S3Credentials::Profile(profile_name) => {
                let mut builder = aws_config::profile::ProfileFileRegionProvider::builder()
                    .profile_name(profile_name);
                if let Some(profile_files) = self.build_profile_files() {
                    builder = builder.profile_files(profile_files);
                }
                Box::new(RegionProviderChain::first_try(region).or_else(builder.build()))
            }
            _ => Box::new(RegionProviderChain::first_try(region).or_default_provider()),
        }
    }

    fn build_retry_config(&self) -> RetryConfig {
        RetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }

    fn build_timeout_config(&self) -> Option<TimeoutConfig> {
        let timeouts = &self.cli_timeout_config;
        if timeouts.operation_timeout_milliseconds.is_none()
            && timeouts.operation_attempt_timeout_milliseconds.is_none()
            && timeouts.connect_timeout_milliseconds.is_none()
            && timeouts.read_timeout_milliseconds.is_none()
        {
            return None;
        }

        let mut builder = TimeoutConfig::builder();
        if let Some(ms) = timeouts.operation_timeout_milliseconds {
            builder = builder.operation_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.operation_attempt_timeout_milliseconds {
            builder = builder.operation_attempt_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.connect_timeout_milliseconds {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = timeouts.read_timeout_milliseconds {
            builder = builder.read_timeout(Duration::from_millis(ms));
        }
        Some(builder.build())
    }
}
