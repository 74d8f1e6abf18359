//! One polling pass over every running domain.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use virtsight_common::{Labels, MetricCollection};

use crate::adapter::adapt;
use crate::error::CollectError;
use crate::expander::expand;
use crate::family::{CPU_USED, DOMAIN_LABEL, StatFamily, StatShape};
use crate::filter::DomainFilter;
use crate::rate::RateTracker;
use crate::registry::MetricRegistry;
use crate::scheduler::shutdown_requested;
use crate::sink::{MetricsSink, PrometheusSink};
use crate::source::{EntityHandle, RawStats, StatsConnection, StatsSource};

/// Settings shared by every cycle of a scheduler.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Hypervisor connection URI.
    pub uri: String,
    /// Scrape interval: the empty-list wait and the rate denominator.
    pub interval: Duration,
    pub filter: DomainFilter,
}

impl CycleSettings {
    pub fn new(uri: impl Into<String>, interval: Duration) -> Self {
        Self {
            uri: uri.into(),
            interval,
            filter: DomainFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: DomainFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Domains listed by the source.
    pub entities: usize,
    /// Domains skipped by the configured filters.
    pub entities_filtered: usize,
    /// Domains abandoned after a retrieval failure.
    pub entities_failed: usize,
    /// Families skipped after a metric contract violation.
    pub families_skipped: usize,
    pub samples_recorded: usize,
    pub duration: Duration,
}

/// How a cycle ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Shutdown was requested while waiting for domains to appear.
    Cancelled,
}

/// A single collection pass.
///
/// Borrows the long-lived collaborators for its duration and is dropped when
/// it ends:
///
/// 1. connect to the source
/// 2. list running domains, waiting one interval at a time while there are
///    none
/// 3. for each domain, collect the families in order and record the samples
/// 4. close the connection
pub struct CollectionCycle<'a, S: StatsSource, K: MetricsSink = PrometheusSink> {
    source: &'a S,
    registry: &'a MetricRegistry<K>,
    rates: &'a mut RateTracker,
    settings: &'a CycleSettings,
}

impl<'a, S: StatsSource, K: MetricsSink> CollectionCycle<'a, S, K> {
    pub fn new(
        source: &'a S,
        registry: &'a MetricRegistry<K>,
        rates: &'a mut RateTracker,
        settings: &'a CycleSettings,
    ) -> Self {
        Self {
            source,
            registry,
            rates,
            settings,
        }
    }

    /// Run the cycle to completion.
    ///
    /// Fails with [`CollectError::Connection`] if the session cannot be opened
    /// or the domains cannot be listed. Per-domain failures are logged and
    /// counted in the report instead. The connection is closed on every path
    /// once it was opened.
    pub async fn run(
        mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, CollectError> {
        let started = Instant::now();

        let conn = self
            .source
            .connect(&self.settings.uri)
            .await
            .map_err(CollectError::Connection)?;

        let result = self.collect(&conn, shutdown, started).await;

        if let Err(e) = conn.close().await {
            warn!(uri = %self.settings.uri, error = %e, "Failed to close connection");
        }

        result
    }

    async fn collect(
        &mut self,
        conn: &S::Connection,
        shutdown: &mut watch::Receiver<bool>,
        started: Instant,
    ) -> Result<CycleOutcome, CollectError> {
        let Some(entities) = self.wait_for_entities(conn, shutdown).await? else {
            return Ok(CycleOutcome::Cancelled);
        };

        let mut report = CycleReport {
            entities: entities.len(),
            ..Default::default()
        };

        for entity in &entities {
            if !self.settings.filter.should_include(entity) {
                trace!(domain = %entity, "Domain filtered out");
                report.entities_filtered += 1;
                continue;
            }

            if let Err(e) = self.collect_entity(conn, entity, &mut report).await {
                warn!(domain = %entity, error = %e, "Skipping domain for this cycle");
                report.entities_failed += 1;
            }
        }

        report.duration = started.elapsed();
        Ok(CycleOutcome::Completed(report))
    }

    /// List domains until at least one is running. `None` if shutdown was
    /// requested while waiting.
    async fn wait_for_entities(
        &self,
        conn: &S::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<EntityHandle>>, CollectError> {
        loop {
            let entities = conn
                .list_entities()
                .await
                .map_err(CollectError::Connection)?;

            if !entities.is_empty() {
                debug!(count = entities.len(), "Listed running domains");
                return Ok(Some(entities));
            }

            debug!(
                wait_secs = self.settings.interval.as_secs_f64(),
                "No running domains, waiting"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown_requested(shutdown) => return Ok(None),
            }
        }
    }

    async fn collect_entity(
        &mut self,
        conn: &S::Connection,
        entity: &EntityHandle,
        report: &mut CycleReport,
    ) -> Result<(), CollectError> {
        for family in StatFamily::ALL {
            let recorded = match self.produce_samples(conn, entity, family).await {
                Ok(collection) => self.record(family, &collection),
                Err(e) => Err(e),
            };

            match recorded {
                Ok(count) => report.samples_recorded += count,
                Err(e) if e.is_contract_violation() => {
                    error!(
                        domain = %entity,
                        family = %family,
                        error = %e,
                        "Metric contract violated, skipping family"
                    );
                    report.families_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn produce_samples(
        &mut self,
        conn: &S::Connection,
        entity: &EntityHandle,
        family: StatFamily,
    ) -> Result<MetricCollection, CollectError> {
        let labels = Labels::new().with(DOMAIN_LABEL, entity.uuid());

        match family.shape() {
            StatShape::SingleDerived => {
                let cpu = conn.cpu_stats(entity).await?;
                let rate = self.rates.derive(
                    entity.uuid(),
                    cpu.normalized(),
                    self.settings.interval.as_secs_f64(),
                );
                let raw = RawStats::from_pairs([(CPU_USED, rate)]);
                adapt(family.metric_names(), &labels, &raw)
            }
            StatShape::Scalar => {
                let raw = conn.memory_stats(entity).await?;
                adapt(&raw.metric_names(), &labels, &raw)
            }
            StatShape::MultiTarget(kind) => {
                expand(conn, entity, family.metric_names(), kind).await
            }
        }
    }

    fn record(
        &self,
        family: StatFamily,
        collection: &MetricCollection,
    ) -> Result<usize, CollectError> {
        let mut written = 0;
        for (suffix, samples) in collection {
            written +=
                self.registry
                    .record_batch(&family.metric_name(suffix), family.unit(), samples)?;
        }
        Ok(written)
    }
}
