//! Crate-level error type.
//!
//! Every module error converts into [`TransferError`]. [`ErrorClass`] buckets them
//! for callers that only need to know whether to retry, alert or fix configuration.

use crate::audit::{DomainValidationError, EventPostError};
use crate::config::ConfigurationError;
use crate::orchestration::{ArchiveError, ServiceError, SplitError, SubmitError};
use crate::publish::{LockError, PublishError};
use crate::state_machine::{PayloadError, StateMachineError};
use crate::storage::phi_store::RecordError;
use crate::storage::RootError;
use crate::transfer::CopyError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Copy, lock or service failure; retried after backoff
    TransientIo,
    /// Identity mismatch, size mismatch or collision; the task is skipped, never repaired
    Integrity,
    /// Missing root or invalid settings; the affected stage halts
    Configuration,
    /// Log server rejected; only remote logging is disabled
    DomainValidation,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Root(#[from] RootError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    DomainValidation(#[from] DomainValidationError),

    #[error(transparent)]
    EventPost(#[from] EventPostError),
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) | Self::Root(_) => ErrorClass::Configuration,
            Self::Copy(e) => copy_class(e),
            Self::Lock(_) => ErrorClass::TransientIo,
            Self::Publish(e) => publish_class(e),
            Self::Record(e) => record_class(e),
            Self::Payload(e) => payload_class(e),
            Self::StateMachine(StateMachineError::Root(_)) => ErrorClass::Configuration,
            Self::StateMachine(_) => ErrorClass::TransientIo,
            Self::Split(e) => split_class(e),
            Self::Submit(e) => submit_class(e),
            Self::Archive(ArchiveError::Record(e)) => record_class(e),
            Self::Archive(_) => ErrorClass::Integrity,
            Self::Service(_) => ErrorClass::TransientIo,
            Self::DomainValidation(_) => ErrorClass::DomainValidation,
            Self::EventPost(EventPostError::NotConfigured) => ErrorClass::DomainValidation,
            Self::EventPost(EventPostError::ClientSetup(_)) => ErrorClass::Configuration,
            Self::EventPost(_) => ErrorClass::TransientIo,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientIo
    }

    /// Reason string for the presentation layer
    pub fn user_message(&self) -> String {
        match self {
            Self::Split(SplitError::InsufficientSpace { .. })
            | Self::Submit(SubmitError::InsufficientSpace { .. }) => {
                "Not enough disk space available at the destination.".to_string()
            }
            Self::Submit(SubmitError::AlreadySubmitted { .. }) => {
                "Filename already exists on server. Select different TaskID.".to_string()
            }
            Self::DomainValidation(e) => e.to_string(),
            _ => match self.class() {
                ErrorClass::TransientIo => {
                    "Transfer failed and will be retried automatically.".to_string()
                }
                ErrorClass::Integrity => "Task data failed an integrity check.".to_string(),
                ErrorClass::Configuration => "Storage locations are not configured correctly.".to_string(),
                ErrorClass::DomainValidation => "Log server is not configured.".to_string(),
            },
        }
    }
}

fn copy_class(error: &CopyError) -> ErrorClass {
    if error.is_integrity() {
        ErrorClass::Integrity
    } else {
        ErrorClass::TransientIo
    }
}

fn publish_class(error: &PublishError) -> ErrorClass {
    match error {
        PublishError::Serialize(_) => ErrorClass::Integrity,
        _ => ErrorClass::TransientIo,
    }
}

fn record_class(error: &RecordError) -> ErrorClass {
    match error {
        RecordError::Parse { .. }
        | RecordError::IdentityMismatch { .. }
        | RecordError::Exists { .. } => ErrorClass::Integrity,
        _ => ErrorClass::TransientIo,
    }
}

fn payload_class(error: &PayloadError) -> ErrorClass {
    if error.is_integrity() {
        ErrorClass::Integrity
    } else {
        ErrorClass::TransientIo
    }
}

fn split_class(error: &SplitError) -> ErrorClass {
    match error {
        SplitError::Copy(e) => copy_class(e),
        SplitError::Record(e) => record_class(e),
        SplitError::Collision { .. } | SplitError::Scrub { .. } => ErrorClass::Integrity,
        SplitError::InsufficientSpace { .. } | SplitError::Lock(_) => ErrorClass::TransientIo,
    }
}

fn submit_class(error: &SubmitError) -> ErrorClass {
    match error {
        SubmitError::Root(_) | SubmitError::InvalidTaskId(_) | SubmitError::QueueMissing { .. } => {
            ErrorClass::Configuration
        }
        SubmitError::AlreadySubmitted { .. } => ErrorClass::Integrity,
        SubmitError::InsufficientSpace { .. } | SubmitError::Lock(_) => ErrorClass::TransientIo,
        SubmitError::Split(e) => split_class(e),
        SubmitError::Copy(e) => copy_class(e),
        SubmitError::Publish(e) => publish_class(e),
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
