//! Periodic driver for the transfer pipeline.
//!
//! Cycles run on a fixed interval or when triggered manually. At most one cycle runs
//! at a time; a tick or trigger arriving while a cycle is in flight is skipped.

use super::pipeline::{CycleReport, TransferPipeline};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Runtime statistics for the poller
#[derive(Debug, Default)]
pub struct PollerStats {
    pub cycles: AtomicU64,
    /// Ticks or triggers skipped because a cycle was already running
    pub skipped: AtomicU64,
    pub stage_errors: AtomicU64,
}

#[derive(Clone)]
pub struct TransferPoller {
    pipeline: Arc<TransferPipeline>,
    config: PollerConfig,
    in_flight: Arc<AtomicBool>,
    trigger: Arc<Notify>,
    stats: Arc<PollerStats>,
}

impl std::fmt::Debug for TransferPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPoller")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag even if the cycle future is dropped midway
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TransferPoller {
    pub fn new(pipeline: Arc<TransferPipeline>, config: PollerConfig) -> Self {
        Self {
            pipeline,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Notify::new()),
            stats: Arc::new(PollerStats::default()),
        }
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Request a cycle without waiting for the next tick
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Run one cycle now. Returns `None` when a cycle is already in flight.
    pub async fn run_once(&self) -> Option<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("Transfer cycle already running, skipping");
            return None;
        }
        let _in_flight = InFlight(&self.in_flight);

        let started = Instant::now();
        let report = self.pipeline.run_cycle().await;

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .stage_errors
            .fetch_add(report.stage_errors.len() as u64, Ordering::Relaxed);
        debug!(duration_ms = started.elapsed().as_millis(), "Transfer cycle finished");

        Some(report)
    }

    /// Drive cycles until `shutdown` flips to `true` or its sender is dropped.
    /// A cycle in progress is allowed to finish.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let poller = self.clone();

        tokio::spawn(async move {
            if !poller.config.enabled {
                info!("Transfer poller disabled by configuration");
                return;
            }

            info!(interval = ?poller.config.interval, "⏱️ POLLER: Starting transfer poller");
            let mut interval = tokio::time::interval(poller.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    _ = interval.tick() => {}
                    _ = poller.trigger.notified() => {
                        debug!("Transfer cycle triggered manually");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            warn!("Shutdown channel closed, stopping transfer poller");
                            break;
                        }
                        continue;
                    }
                }

                poller.run_once().await;
            }

            info!("🛑 POLLER: Transfer poller stopped");
        })
    }
}
