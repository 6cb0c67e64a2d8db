//! # Transfer System Bootstrap
//!
//! Wires the configured roots, the PHI store, the state machine, submission, the
//! transfer pipeline, its poller and remote audit logging into one system, and
//! manages the running background tasks.

use super::archiver::TaskArchiver;
use super::pipeline::TransferPipeline;
use super::poller::TransferPoller;
use super::services::{ProcessingService, ResultSink};
use super::splitter::{PayloadScrubber, PhiSplitter};
use super::submitter::TaskSubmitter;
use crate::audit::{AuditForwarder, DomainValidator, NslookupResolver, SecureEventLogger};
use crate::config::TransferConfig;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::state_machine::{ActiveJob, TaskStateMachine};
use crate::storage::{FreeSpaceProbe, PhiStore, SystemFreeSpace};
use crate::transfer::{ReliableCopy, StdFileCopier};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Collaborators supplied by the embedding application
pub struct SystemServices {
    pub processing: Arc<dyn ProcessingService>,
    pub sink: Arc<dyn ResultSink>,
    pub scrubber: Arc<dyn PayloadScrubber>,
    /// Defaults to the host's disk statistics
    pub free_space: Option<Arc<dyn FreeSpaceProbe>>,
}

pub struct TransferSystem {
    config: TransferConfig,
    events: EventPublisher,
    machine: TaskStateMachine,
    submitter: TaskSubmitter,
    pipeline: Arc<TransferPipeline>,
    poller: TransferPoller,
    event_logger: SecureEventLogger,
}

impl std::fmt::Debug for TransferSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSystem")
            .field("roots", self.machine.roots())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

/// Running background tasks of a started system
#[derive(Debug)]
pub struct SystemHandle {
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl SystemHandle {
    /// Stop the poller after its current cycle and detach the audit forwarder
    pub async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            warn!("Transfer poller already stopped");
        }
        if let Err(e) = self.poller.await {
            warn!(error = %e, "Transfer poller ended abnormally");
        }
        self.forwarder.abort();
        info!("🛑 SYSTEM: Transfer system stopped");
    }
}

impl TransferSystem {
    /// Validate the configuration, create missing roots and build every component
    pub fn bootstrap(config: TransferConfig, services: SystemServices) -> Result<Self> {
        config.validate()?;

        let roots = config.storage_roots();
        roots.ensure_exists()?;

        let events = EventPublisher::default();
        let store = PhiStore::new(roots.clone(), config.lock_wait());
        let machine = TaskStateMachine::new(store.clone(), ActiveJob::new());

        let free_space = services
            .free_space
            .unwrap_or_else(|| Arc::new(SystemFreeSpace));
        let copy = ReliableCopy::new(Arc::new(StdFileCopier), free_space, config.copy_settings());

        let splitter = PhiSplitter::new(store.clone(), copy.clone(), services.scrubber);
        let archiver = TaskArchiver::new(store, events.clone());
        let submitter = TaskSubmitter::new(roots, splitter, copy, archiver, events.clone());

        let pipeline = Arc::new(TransferPipeline::new(
            machine.clone(),
            services.processing,
            services.sink,
            events.clone(),
            config.pipeline_settings(),
        ));
        let poller = TransferPoller::new(pipeline.clone(), config.poller_config());

        let resolver = Arc::new(NslookupResolver::new(config.dns_timeout()));
        let validator = DomainValidator::new(resolver, config.connect_timeout());
        let event_logger = SecureEventLogger::new(config.event_logger_settings(), validator)?;

        info!(
            outbound = %config.roots.outbound.display(),
            interval_secs = config.poller.interval_secs,
            "🏗️ SYSTEM: Transfer system bootstrapped"
        );

        Ok(Self {
            config,
            events,
            machine,
            submitter,
            pipeline,
            poller,
            event_logger,
        })
    }

    /// Configure remote logging and start the background tasks. A log server that
    /// fails validation only disables remote logging.
    pub async fn start(&self) -> SystemHandle {
        if !self.event_logger.configure(&self.config.event_log.endpoint).await
            && self.event_logger.is_configuration_error()
        {
            warn!("Remote event logging disabled");
        }

        let forwarder = AuditForwarder::new(self.event_logger.clone()).spawn(&self.events);
        let (shutdown, receiver) = watch::channel(false);
        let poller = self.poller.spawn(receiver);

        SystemHandle {
            shutdown,
            poller,
            forwarder,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn machine(&self) -> &TaskStateMachine {
        &self.machine
    }

    pub fn submitter(&self) -> &TaskSubmitter {
        &self.submitter
    }

    pub fn pipeline(&self) -> &Arc<TransferPipeline> {
        &self.pipeline
    }

    pub fn poller(&self) -> &TransferPoller {
        &self.poller
    }

    pub fn event_logger(&self) -> &SecureEventLogger {
        &self.event_logger
    }
}
