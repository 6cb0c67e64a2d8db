//! Log server endpoint parsing and same-domain validation.
//!
//! Audit events may only leave the client when the log server resolves into the same
//! network domain as the client's locally routed address. The comparison uses the
//! last two labels of both resolved host names.

use super::resolver::HostResolver;
use crate::constants::{timeouts, DEFAULT_LOG_SERVER_PORT};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainValidationError {
    #[error("No server address entered.")]
    NoServerAddress,

    #[error("Unable to connect to server.")]
    Unreachable { endpoint: String, reason: String },

    #[error("Unable to resolve local hostname.")]
    LocalNameUnresolved { address: String },

    #[error("Unable to resolve server name.")]
    ServerNameUnresolved { host: String },

    #[error("Error resolving hostnames.")]
    MalformedHostnames { local: String, server: String },

    #[error("Log server not in local domain.")]
    OutsideDomain { local: String, server: String },
}

/// Log server address as entered: `host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    /// Explicit port, if one was given and valid
    pub port: Option<u16>,
}

impl Endpoint {
    /// Parse `host[:port]`; an invalid port is ignored in favour of the default
    pub fn parse(value: &str) -> Result<Self, DomainValidationError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DomainValidationError::NoServerAddress);
        }

        let (host, port) = match value.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (value, None),
        };

        if host.is_empty() {
            return Err(DomainValidationError::NoServerAddress);
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn connect_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_LOG_SERVER_PORT)
    }

    /// Authority used in request URLs, keeping the port only when it was given
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Resolved names of a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainMatch {
    pub local_host: String,
    pub server_host: String,
}

/// Compare the last two labels of two host names, case-insensitively
pub fn same_domain(local: &str, server: &str) -> Result<(), DomainValidationError> {
    let local_lower = local.to_lowercase();
    let server_lower = server.to_lowercase();
    let local_labels: Vec<&str> = local_lower.split('.').collect();
    let server_labels: Vec<&str> = server_lower.split('.').collect();

    if local_labels.len() < 2 || server_labels.len() < 2 {
        return Err(DomainValidationError::MalformedHostnames {
            local: local.to_string(),
            server: server.to_string(),
        });
    }

    if local_labels[local_labels.len() - 2..] != server_labels[server_labels.len() - 2..] {
        return Err(DomainValidationError::OutsideDomain {
            local: local.to_string(),
            server: server.to_string(),
        });
    }

    Ok(())
}

#[derive(Clone)]
pub struct DomainValidator {
    resolver: Arc<dyn HostResolver>,
    connect_timeout: Duration,
}

impl fmt::Debug for DomainValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainValidator")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl DomainValidator {
    pub fn new(resolver: Arc<dyn HostResolver>, connect_timeout: Duration) -> Self {
        Self {
            resolver,
            connect_timeout,
        }
    }

    pub fn with_default_timeout(resolver: Arc<dyn HostResolver>) -> Self {
        Self::new(resolver, timeouts::CONNECT_PROBE)
    }

    pub async fn validate(&self, endpoint: &Endpoint) -> Result<DomainMatch, DomainValidationError> {
        let local_ip = self.local_address(endpoint).await?;

        let local_host = self
            .resolver
            .resolve(&local_ip)
            .await
            .ok_or(DomainValidationError::LocalNameUnresolved {
                address: local_ip.clone(),
            })?;

        let server_host = self
            .resolver
            .resolve(&endpoint.host)
            .await
            .ok_or_else(|| DomainValidationError::ServerNameUnresolved {
                host: endpoint.host.clone(),
            })?;

        if let Err(error) = same_domain(&local_host, &server_host) {
            warn!(
                local_host = %local_host,
                server_host = %server_host,
                "Log server failed domain validation"
            );
            return Err(error);
        }

        info!(
            local_host = %local_host,
            server_host = %server_host,
            "🔐 AUDIT: Log server domain validated"
        );

        Ok(DomainMatch {
            local_host,
            server_host,
        })
    }

    /// Open a short-lived connection to learn the locally routed address
    async fn local_address(&self, endpoint: &Endpoint) -> Result<String, DomainValidationError> {
        let target = (endpoint.host.as_str(), endpoint.connect_port());
        let unreachable = |reason: String| DomainValidationError::Unreachable {
            endpoint: endpoint.to_string(),
            reason,
        };

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| unreachable("connection timed out".to_string()))?
            .map_err(|error| unreachable(error.to_string()))?;

        let local = stream
            .local_addr()
            .map_err(|error| unreachable(error.to_string()))?;

        debug!(endpoint = %endpoint, local_ip = %local.ip(), "Connection probe succeeded");
        Ok(local.ip().to_string())
    }
}
