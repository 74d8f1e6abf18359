//! Fixed-delay driver for collection cycles.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};
use virtsight_common::{Labels, Sample};

use crate::cycle::{CollectionCycle, CycleOutcome, CycleReport, CycleSettings};
use crate::error::CollectError;
use crate::rate::RateTracker;
use crate::registry::SharedRegistry;
use crate::source::StatsSource;

const SELF_METRIC_LABEL: &str = "uri";

/// Exporter statistics, updated after every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExporterStats {
    /// Hypervisor connection URI.
    pub uri: String,
    pub scrape_interval_secs: u64,
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles aborted by a connection failure.
    pub cycles_failed: u64,
    /// Domains listed in the last completed cycle.
    pub domains: usize,
    /// Domains that failed in the last completed cycle.
    pub domains_failed: usize,
    /// Samples recorded in the last completed cycle.
    pub samples_recorded: usize,
    pub last_cycle_duration_secs: f64,
    /// Series currently held by the registry.
    pub series: usize,
    pub last_error: Option<String>,
}

impl ExporterStats {
    /// Whether at least one cycle has completed.
    pub fn is_ready(&self) -> bool {
        self.cycles_completed > 0
    }
}

/// Statistics handle shared with the HTTP server.
pub type SharedStats = Arc<RwLock<ExporterStats>>;

/// Drives collection cycles until shutdown.
///
/// The first cycle starts immediately; each following one starts exactly one
/// scrape interval after the previous one ended. A failed cycle is logged and
/// counted, never retried early and never fatal.
pub struct Scheduler<S: StatsSource> {
    source: S,
    registry: SharedRegistry,
    rates: RateTracker,
    settings: CycleSettings,
    stats: SharedStats,
}

impl<S: StatsSource> Scheduler<S> {
    pub fn new(source: S, registry: SharedRegistry, settings: CycleSettings) -> Self {
        let stats = ExporterStats {
            uri: settings.uri.clone(),
            scrape_interval_secs: settings.interval.as_secs(),
            ..Default::default()
        };

        Self {
            source,
            registry,
            rates: RateTracker::new(),
            settings,
            stats: Arc::new(RwLock::new(stats)),
        }
    }

    pub fn stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Run cycles until the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            uri = %self.settings.uri,
            interval_secs = self.settings.interval.as_secs_f64(),
            "Starting collection scheduler"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Ok(CycleOutcome::Cancelled) = self.run_cycle(&mut shutdown).await {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!("Collection scheduler stopped");
    }

    /// Run one cycle and publish its outcome to the statistics and
    /// self-metrics.
    pub async fn run_cycle(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, CollectError> {
        let outcome = CollectionCycle::new(
            &self.source,
            &*self.registry,
            &mut self.rates,
            &self.settings,
        )
        .run(shutdown)
        .await;

        let (completed, failed) = match &outcome {
            Ok(CycleOutcome::Completed(report)) => {
                debug!(
                    domains = report.entities,
                    filtered = report.entities_filtered,
                    failed = report.entities_failed,
                    families_skipped = report.families_skipped,
                    samples = report.samples_recorded,
                    duration_ms = report.duration.as_millis() as u64,
                    "Collection cycle completed"
                );
                self.on_completed(report);
                (1, 0)
            }
            Ok(CycleOutcome::Cancelled) => {
                debug!("Collection cycle cancelled");
                (0, 0)
            }
            Err(e) => {
                error!(uri = %self.settings.uri, error = %e, "Collection cycle failed");
                self.on_failed(e);
                (0, 1)
            }
        };

        self.record_self_metrics(completed, failed);
        outcome
    }

    fn on_completed(&self, report: &CycleReport) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.domains = report.entities;
        stats.domains_failed = report.entities_failed;
        stats.samples_recorded = report.samples_recorded;
        stats.last_cycle_duration_secs = report.duration.as_secs_f64();
        stats.last_error = None;
    }

    fn on_failed(&self, e: &CollectError) {
        let mut stats = self.stats.write();
        stats.cycles_failed += 1;
        stats.last_error = Some(e.to_string());
    }

    fn record_self_metrics(&self, completed: u64, failed: u64) {
        let labels = Labels::new().with(SELF_METRIC_LABEL, self.settings.uri.as_str());

        let counters = [
            (
                "libvirt_exporter_cycles_total",
                "Collection cycles that ran to completion",
                completed,
            ),
            (
                "libvirt_exporter_cycle_failures_total",
                "Collection cycles aborted by a connection failure",
                failed,
            ),
        ];
        for (name, help, by) in counters {
            if let Err(e) = self.registry.increment_counter(name, help, &labels, by) {
                error!(metric = %name, error = %e, "Failed to record exporter metric");
            }
        }

        let snapshot = {
            let mut stats = self.stats.write();
            stats.series = self.registry.series_count();
            stats.clone()
        };

        let gauges = [
            (
                "libvirt_exporter_domains",
                "Domains listed in the last completed cycle",
                snapshot.domains as f64,
            ),
            (
                "libvirt_exporter_cycle_duration_seconds",
                "Duration of the last completed cycle",
                snapshot.last_cycle_duration_secs,
            ),
            (
                "libvirt_exporter_series",
                "Series held by the metric registry",
                snapshot.series as f64,
            ),
        ];
        for (name, help, value) in gauges {
            let sample = Sample::new(value, labels.clone());
            if let Err(e) = self.registry.record_described(name, help, &[sample]) {
                error!(metric = %name, error = %e, "Failed to record exporter metric");
            }
        }
    }
}

/// Resolve once shutdown has been requested.
///
/// A dropped sender never requests shutdown, so this stays pending.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
