//! # Audit Logging
//!
//! Domain-validated remote event logging. Failures here only ever disable remote
//! logging; they never reach the transfer pipeline.

pub mod domain;
pub mod event;
pub mod forwarder;
pub mod logger;
pub mod resolver;

pub use domain::{same_domain, DomainMatch, DomainValidationError, DomainValidator, Endpoint};
pub use event::{EventDetail, EventFields, EventType, Severity, SourceType};
pub use forwarder::AuditForwarder;
pub use logger::{EventLoggerSettings, EventPostError, PostOutcome, SecureEventLogger};
pub use resolver::{parse_nslookup_output, HostResolver, NslookupResolver};
