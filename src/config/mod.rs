//! # Configuration
//!
//! Settings for the storage roots, copy bounds, polling, retry policy, lock waits,
//! remote event logging and local log output. Every field has a default; a TOML file
//! and `RECON_TRANSFER__SECTION__FIELD` environment variables override them.
//!
//! ```rust
//! use recon_transfer::config::TransferConfig;
//!
//! let config = TransferConfig::default();
//! assert_eq!(config.poller.interval_secs, 60);
//! assert!(config.validate().is_ok());
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{sanitize_config_for_logging, ConfigLoader, ENV_PREFIX};

use crate::audit::{EventLoggerSettings, SourceType};
use crate::constants::timeouts;
use crate::orchestration::{PipelineSettings, PollerConfig};
use crate::state_machine::{BackoffPolicy, RetryLimits};
use crate::storage::{LockWait, StorageRoots};
use crate::transfer::CopySettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub roots: RootsConfig,
    pub copy: CopyConfig,
    pub poller: PollerSection,
    pub retry: RetryConfig,
    pub locks: LocksConfig,
    pub event_log: EventLogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    pub outbound: PathBuf,
    pub phi: PathBuf,
    pub inbound: PathBuf,
    pub archive: PathBuf,
}

impl Default for RootsConfig {
    fn default() -> Self {
        let base = StorageRoots::under("data");
        Self {
            outbound: base.outbound,
            phi: base.phi,
            inbound: base.inbound,
            archive: base.archive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub primary_timeout_secs: u64,
    /// Absolute bound on a single copy
    pub ceiling_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        let defaults = CopySettings::default();
        Self {
            primary_timeout_secs: defaults.primary_timeout.as_secs(),
            ceiling_secs: defaults.ceiling.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_tasks_per_cycle: usize,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            max_tasks_per_cycle: 10,
        }
    }
}

/// Backoff and optional exhaustion limits. An unset limit retries forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub upload_limit: Option<u32>,
    pub download_limit: Option<u32>,
    pub storage_limit: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 60,
            backoff_max_secs: 60 * 60,
            upload_limit: None,
            download_limit: None,
            storage_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    pub wait_attempts: u32,
    pub wait_interval_ms: u64,
    /// Lock markers older than this are treated as left by a crashed writer
    pub stale_lock_age_secs: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        let wait = LockWait::default();
        Self {
            wait_attempts: wait.attempts,
            wait_interval_ms: wait.interval.as_millis() as u64,
            stale_lock_age_secs: timeouts::STALE_LOCK_AGE.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// `host[:port]`; empty disables remote event logging
    pub endpoint: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub post_timeout_secs: u64,
    pub dns_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    pub skip_domain_validation: bool,
    pub use_tls: bool,
    pub ca_certificate: Option<PathBuf>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            source_id: String::new(),
            source_type: SourceType::Client,
            post_timeout_secs: 5,
            dns_timeout_secs: 6,
            connect_timeout_ms: 1000,
            skip_domain_validation: false,
            use_tls: true,
            ca_certificate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    /// Overrides the level derived from the environment
    pub level: Option<String>,
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("log"),
            level: None,
            file_output: true,
        }
    }
}

impl TransferConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        let roots = [
            ("roots.outbound", &self.roots.outbound),
            ("roots.phi", &self.roots.phi),
            ("roots.inbound", &self.roots.inbound),
            ("roots.archive", &self.roots.archive),
        ];
        for (field, path) in &roots {
            if path.as_os_str().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    *field,
                    "storage roots",
                ));
            }
        }
        for (index, (field, path)) in roots.iter().enumerate() {
            if roots[..index].iter().any(|(_, other)| other == path) {
                return Err(ConfigurationError::invalid_value(
                    *field,
                    path.display().to_string(),
                    "every storage root must be a separate directory",
                ));
            }
        }

        if self.copy.primary_timeout_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "copy.primary_timeout_secs",
                "0",
                "primary timeout must be greater than 0",
            ));
        }
        if self.copy.ceiling_secs < self.copy.primary_timeout_secs {
            return Err(ConfigurationError::invalid_value(
                "copy.ceiling_secs",
                self.copy.ceiling_secs.to_string(),
                "ceiling must not be shorter than the primary timeout",
            ));
        }
        if self.copy.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "copy.poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        if self.poller.interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "poller.interval_secs",
                "0",
                "poll interval must be greater than 0",
            ));
        }
        if self.poller.max_tasks_per_cycle == 0 {
            return Err(ConfigurationError::invalid_value(
                "poller.max_tasks_per_cycle",
                "0",
                "at least one task per cycle is required",
            ));
        }

        if self.retry.backoff_base_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_base_secs",
                "0",
                "backoff base must be greater than 0",
            ));
        }
        if self.retry.backoff_max_secs < self.retry.backoff_base_secs {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_max_secs",
                self.retry.backoff_max_secs.to_string(),
                "maximum backoff must not be shorter than the base",
            ));
        }

        if self.retry.backoff_max_secs > timeouts::MAX_BACKOFF.as_secs() {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_max_secs",
                self.retry.backoff_max_secs.to_string(),
                "maximum backoff must not exceed 30 days",
            ));
        }

        if self.locks.wait_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "locks.wait_attempts",
                "0",
                "at least one lock attempt is required",
            ));
        }
        if self.locks.stale_lock_age_secs <= self.copy.ceiling_secs {
            return Err(ConfigurationError::invalid_value(
                "locks.stale_lock_age_secs",
                self.locks.stale_lock_age_secs.to_string(),
                "stale lock age must exceed the copy ceiling so live writers keep their lock",
            ));
        }

        Ok(())
    }

    pub fn storage_roots(&self) -> StorageRoots {
        StorageRoots::new(
            self.roots.outbound.clone(),
            self.roots.phi.clone(),
            self.roots.inbound.clone(),
            self.roots.archive.clone(),
        )
    }

    pub fn copy_settings(&self) -> CopySettings {
        CopySettings {
            primary_timeout: Duration::from_secs(self.copy.primary_timeout_secs),
            ceiling: Duration::from_secs(self.copy.ceiling_secs),
            poll_interval: Duration::from_millis(self.copy.poll_interval_ms),
        }
    }

    pub fn lock_wait(&self) -> LockWait {
        LockWait {
            attempts: self.locks.wait_attempts,
            interval: Duration::from_millis(self.locks.wait_interval_ms),
        }
    }

    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            upload: self.retry.upload_limit,
            download: self.retry.download_limit,
            storage: self.retry.storage_limit,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.retry.backoff_base_secs),
            Duration::from_secs(self.retry.backoff_max_secs),
        )
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_tasks_per_cycle: self.poller.max_tasks_per_cycle,
            backoff: self.backoff(),
            limits: self.retry_limits(),
            stale_lock_age: Duration::from_secs(self.locks.stale_lock_age_secs),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            enabled: self.poller.enabled,
            interval: Duration::from_secs(self.poller.interval_secs),
        }
    }

    pub fn event_logger_settings(&self) -> EventLoggerSettings {
        EventLoggerSettings {
            source_id: self.event_log.source_id.clone(),
            source_type: self.event_log.source_type,
            post_timeout: Duration::from_secs(self.event_log.post_timeout_secs),
            skip_domain_validation: self.event_log.skip_domain_validation,
            use_tls: self.event_log.use_tls,
            ca_certificate: self.event_log.ca_certificate.clone(),
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.event_log.dns_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.event_log.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.copy_settings(), CopySettings::default());
        assert_eq!(config.lock_wait(), LockWait::default());
        assert_eq!(config.retry_limits(), RetryLimits::default());
        assert_eq!(config.roots.phi, PathBuf::from("data").join("phi"));
    }

    #[test]
    fn test_shared_root_is_rejected() {
        let mut config = TransferConfig::default();
        config.roots.phi = config.roots.outbound.clone();

        match config.validate() {
            Err(ConfigurationError::InvalidValue { field, .. }) => assert_eq!(field, "roots.phi"),
            other => panic!("expected invalid root, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_root_is_rejected() {
        let mut config = TransferConfig::default();
        config.roots.archive = PathBuf::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_ceiling_shorter_than_primary_is_rejected() {
        let mut config = TransferConfig::default();
        config.copy.primary_timeout_secs = 120;
        config.copy.ceiling_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_absurd_backoff_is_rejected() {
        let mut config = TransferConfig::default();
        config.retry.backoff_base_secs = 1 << 44;
        config.retry.backoff_max_secs = 1 << 44;

        match config.validate() {
            Err(ConfigurationError::InvalidValue { field, .. }) => {
                assert_eq!(field, "retry.backoff_max_secs")
            }
            other => panic!("expected invalid backoff, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_lock_age_must_exceed_copy_ceiling() {
        let mut config = TransferConfig::default();
        config.locks.stale_lock_age_secs = config.copy.ceiling_secs;

        match config.validate() {
            Err(ConfigurationError::InvalidValue { field, .. }) => {
                assert_eq!(field, "locks.stale_lock_age_secs")
            }
            other => panic!("expected invalid stale lock age, got {other:?}"),
        }

        config.locks.stale_lock_age_secs = config.copy.ceiling_secs + 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut config = TransferConfig::default();
        config.poller.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_settings_carry_limits() {
        let mut config = TransferConfig::default();
        config.retry.download_limit = Some(3);
        config.poller.max_tasks_per_cycle = 4;

        let settings = config.pipeline_settings();
        assert_eq!(settings.max_tasks_per_cycle, 4);
        assert_eq!(settings.limits.download, Some(3));
        assert_eq!(settings.limits.upload, None);
    }
}
