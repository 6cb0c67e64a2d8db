//! # Secure Event Logger
//!
//! Posts audit events to a log server over HTTPS, but only after the server has
//! passed same-domain validation. An unconfigured logger drops every event without
//! raising or blocking, so audit posting can never stall the transfer pipeline.

use super::domain::{DomainValidationError, DomainValidator, Endpoint};
use super::event::{EventFields, SourceType};
use crate::constants::{timeouts, EVENTS_RESOURCE};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EventPostError {
    #[error("Event logger is not configured")]
    NotConfigured,

    #[error("Event post timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Event post failed to reach the server: {0}")]
    Transport(String),

    #[error("Log server responded with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Unable to set up HTTP client: {0}")]
    ClientSetup(String),
}

/// Result of a synchronous post. Transport failures and non-200 responses are
/// reported separately.
#[derive(Debug)]
pub struct PostOutcome {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<EventPostError>,
}

impl PostOutcome {
    fn failed(error: EventPostError) -> Self {
        let http_status = match &error {
            EventPostError::HttpStatus { status } => Some(*status),
            _ => None,
        };
        Self {
            success: false,
            http_status,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLoggerSettings {
    pub source_id: String,
    pub source_type: SourceType,
    /// Bound for fire-and-forget posts
    pub post_timeout: Duration,
    pub skip_domain_validation: bool,
    /// Plain HTTP is only meant for local test collectors
    pub use_tls: bool,
    /// Extra CA certificate (PEM) trusted for the log server
    pub ca_certificate: Option<PathBuf>,
}

impl Default for EventLoggerSettings {
    fn default() -> Self {
        Self {
            source_id: String::new(),
            source_type: SourceType::Client,
            post_timeout: timeouts::EVENT_POST,
            skip_domain_validation: false,
            use_tls: true,
            ca_certificate: None,
        }
    }
}

#[derive(Debug, Default)]
struct LoggerState {
    endpoint: Option<Endpoint>,
    configured: bool,
    configuration_error: bool,
    last_error: Option<DomainValidationError>,
}

#[derive(Clone)]
pub struct SecureEventLogger {
    client: reqwest::Client,
    validator: DomainValidator,
    settings: EventLoggerSettings,
    state: Arc<RwLock<LoggerState>>,
}

impl std::fmt::Debug for SecureEventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureEventLogger")
            .field("settings", &self.settings)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl SecureEventLogger {
    pub fn new(
        settings: EventLoggerSettings,
        validator: DomainValidator,
    ) -> Result<Self, EventPostError> {
        let mut builder = reqwest::Client::builder();

        if let Some(path) = &settings.ca_certificate {
            match std::fs::read(path) {
                Ok(pem) => match reqwest::Certificate::from_pem(&pem) {
                    Ok(certificate) => builder = builder.add_root_certificate(certificate),
                    Err(e) => warn!(path = %path.display(), error = %e, "Invalid log server certificate"),
                },
                Err(e) => debug!(path = %path.display(), error = %e, "No log server certificate found"),
            }
        }

        let client = builder
            .build()
            .map_err(|e| EventPostError::ClientSetup(e.to_string()))?;

        Ok(Self {
            client,
            validator,
            settings,
            state: Arc::new(RwLock::new(LoggerState::default())),
        })
    }

    /// Set the endpoint and validate it. An empty endpoint leaves the logger
    /// unconfigured without flagging a configuration error.
    pub async fn configure(&self, endpoint: &str) -> bool {
        {
            let mut state = self.state.write();
            *state = LoggerState::default();
        }

        if endpoint.trim().is_empty() {
            debug!("No log server configured, remote event logging disabled");
            return false;
        }

        match Endpoint::parse(endpoint) {
            Ok(parsed) => {
                self.state.write().endpoint = Some(parsed);
                self.validate().await
            }
            Err(error) => {
                self.record_validation(Err(error));
                false
            }
        }
    }

    /// Re-run domain validation against the configured endpoint
    pub async fn retry_domain_validation(&self) -> bool {
        if self.state.read().endpoint.is_none() {
            return false;
        }
        self.validate().await
    }

    async fn validate(&self) -> bool {
        let Some(endpoint) = self.state.read().endpoint.clone() else {
            return false;
        };

        if self.settings.skip_domain_validation {
            warn!(endpoint = %endpoint, "Domain validation skipped for log server");
            self.record_validation(Ok(()));
            return true;
        }

        let result = self.validator.validate(&endpoint).await.map(|_| ());
        self.record_validation(result)
    }

    fn record_validation(&self, result: Result<(), DomainValidationError>) -> bool {
        let mut state = self.state.write();
        match result {
            Ok(()) => {
                state.configured = true;
                state.configuration_error = false;
                state.last_error = None;
                true
            }
            Err(error) => {
                error!(
                    error = %error,
                    "❌ AUDIT: Configuration of log server failed, remote logging disabled"
                );
                state.configured = false;
                state.configuration_error = true;
                state.last_error = Some(error);
                false
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state.read().configured
    }

    pub fn is_configuration_error(&self) -> bool {
        self.state.read().configuration_error
    }

    /// Most recent validation failure, for display
    pub fn last_error(&self) -> Option<DomainValidationError> {
        self.state.read().last_error.clone()
    }

    fn events_url(&self) -> Option<String> {
        let state = self.state.read();
        if !state.configured {
            return None;
        }
        let endpoint = state.endpoint.as_ref()?;
        let scheme = if self.settings.use_tls { "https" } else { "http" };
        Some(format!("{scheme}://{}/{EVENTS_RESOURCE}", endpoint.authority()))
    }

    /// Fire-and-forget post. Silently dropped when unconfigured or when no async
    /// runtime is available.
    pub fn post_event(&self, fields: EventFields) {
        let Some(url) = self.events_url() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, event dropped");
            return;
        };

        let request = self
            .client
            .post(url)
            .form(&fields.to_form(&self.settings.source_id, self.settings.source_type))
            .timeout(self.settings.post_timeout);

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().as_u16() == 200 => {}
                Ok(response) => {
                    debug!(status = response.status().as_u16(), "Log server rejected event")
                }
                Err(e) => debug!(error = %e, "Event post failed"),
            }
        });
    }

    /// Post and wait up to `timeout`. Success only on HTTP 200.
    pub async fn post_event_sync(&self, fields: EventFields, timeout: Duration) -> PostOutcome {
        let Some(url) = self.events_url() else {
            return PostOutcome::failed(EventPostError::NotConfigured);
        };

        let request = self
            .client
            .post(url)
            .form(&fields.to_form(&self.settings.source_id, self.settings.source_type))
            .timeout(timeout);

        let response = match tokio::time::timeout(timeout, request.send()).await {
            Err(_) => return PostOutcome::failed(EventPostError::Timeout { after: timeout }),
            Ok(Err(e)) if e.is_timeout() => {
                return PostOutcome::failed(EventPostError::Timeout { after: timeout })
            }
            Ok(Err(e)) => return PostOutcome::failed(EventPostError::Transport(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status().as_u16();
        if status != 200 {
            info!(status = status, "Log server did not accept event");
            return PostOutcome::failed(EventPostError::HttpStatus { status });
        }

        PostOutcome {
            success: true,
            http_status: Some(status),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{EventDetail, EventType, Severity};
    use crate::audit::resolver::HostResolver;
    use async_trait::async_trait;

    struct NoResolver;

    #[async_trait]
    impl HostResolver for NoResolver {
        async fn resolve(&self, _address: &str) -> Option<String> {
            None
        }
    }

    fn logger(settings: EventLoggerSettings) -> SecureEventLogger {
        let validator = DomainValidator::new(Arc::new(NoResolver), Duration::from_millis(200));
        SecureEventLogger::new(settings, validator).unwrap()
    }

    fn event() -> EventFields {
        EventFields::new(EventType::Generic, EventDetail::Information, Severity::Success)
    }

    #[tokio::test]
    async fn test_empty_endpoint_is_not_an_error() {
        let logger = logger(EventLoggerSettings::default());
        assert!(!logger.configure("").await);
        assert!(!logger.is_configured());
        assert!(!logger.is_configuration_error());
        assert!(logger.last_error().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_disables_logging() {
        let logger = logger(EventLoggerSettings::default());
        // Port 1 on loopback refuses connections
        assert!(!logger.configure("127.0.0.1:1").await);
        assert!(logger.is_configuration_error());
        assert!(matches!(
            logger.last_error(),
            Some(DomainValidationError::Unreachable { .. })
        ));

        // Dropped silently, never blocks
        logger.post_event(event());
        let outcome = logger.post_event_sync(event(), Duration::from_millis(100)).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(EventPostError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_skip_validation_configures() {
        let logger = logger(EventLoggerSettings {
            skip_domain_validation: true,
            ..EventLoggerSettings::default()
        });
        assert!(logger.configure("logs.clinic.org").await);
        assert!(logger.is_configured());
        assert_eq!(
            logger.events_url().as_deref(),
            Some("https://logs.clinic.org/Events")
        );
    }

    #[tokio::test]
    async fn test_retry_without_endpoint() {
        let logger = logger(EventLoggerSettings::default());
        assert!(!logger.retry_domain_validation().await);
    }
}
