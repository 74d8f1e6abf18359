//! In-memory statistics source.
//!
//! Used by the test suites and by `--demo` for running the exporter
//! without a hypervisor. Clones share state, so a test can keep a handle and
//! mutate domains while a scheduler owns another.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::SourceError;
use crate::source::{
    BlockStats, CpuStats, EntityHandle, InterfaceStats, RawStats, StatsConnection, StatsSource,
};
use crate::topology::DeviceTopology;

/// Scripted statistics of one domain.
#[derive(Debug, Clone, Default)]
pub struct MockDomain {
    pub cpu: CpuStats,
    pub memory: IndexMap<String, f64>,
    pub disks: Vec<(String, BlockStats)>,
    pub interfaces: Vec<(String, InterfaceStats)>,
    /// Targets whose counter query fails.
    pub failing_targets: Vec<String>,
    /// Make every per-domain statistics call fail.
    pub fail_stats: bool,
}

impl MockDomain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpu(mut self, total_ns: u64, vcpus: u32) -> Self {
        self.cpu = CpuStats::new(vec![total_ns], vcpus);
        self
    }

    pub fn with_memory(mut self, counters: &[(&str, f64)]) -> Self {
        self.memory = counters
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        self
    }

    pub fn with_disk(mut self, target: &str, stats: BlockStats) -> Self {
        self.disks.push((target.to_string(), stats));
        self
    }

    pub fn with_interface(mut self, target: &str, stats: InterfaceStats) -> Self {
        self.interfaces.push((target.to_string(), stats));
        self
    }

    pub fn with_failing_target(mut self, target: &str) -> Self {
        self.failing_targets.push(target.to_string());
        self
    }

    pub fn with_failing_stats(mut self) -> Self {
        self.fail_stats = true;
        self
    }

    fn check_target(&self, target: &str, command: &str) -> Result<(), SourceError> {
        if self.failing_targets.iter().any(|t| t == target) {
            return Err(SourceError::Command {
                command: format!("{} {}", command, target),
                message: "device query failed".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockState {
    /// Entity lists returned by the next `list_entities` calls, in order.
    polls: VecDeque<Vec<String>>,
    domains: IndexMap<String, MockDomain>,
    fail_connect: bool,
    connects: usize,
    closes: usize,
    list_calls: usize,
}

/// Scripted [`StatsSource`].
///
/// Lists the registered domains unless [`script_polls`](Self::script_polls)
/// queued explicit answers.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(self, uuid: &str, domain: MockDomain) -> Self {
        self.set_domain(uuid, domain);
        self
    }

    pub fn set_domain(&self, uuid: &str, domain: MockDomain) {
        self.state.lock().domains.insert(uuid.to_string(), domain);
    }

    /// Mutate a registered domain in place. Returns false if it is unknown.
    pub fn update_domain(&self, uuid: &str, update: impl FnOnce(&mut MockDomain)) -> bool {
        match self.state.lock().domains.get_mut(uuid) {
            Some(domain) => {
                update(domain);
                true
            }
            None => false,
        }
    }

    pub fn remove_domain(&self, uuid: &str) -> Option<MockDomain> {
        self.state.lock().domains.shift_remove(uuid)
    }

    /// Queue the entity lists returned by the next listing calls.
    pub fn script_polls(&self, polls: Vec<Vec<&str>>) {
        let mut state = self.state.lock();
        state.polls.extend(
            polls
                .into_iter()
                .map(|poll| poll.into_iter().map(str::to_string).collect::<Vec<_>>()),
        );
    }

    pub fn set_connect_failure(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn list_count(&self) -> usize {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl StatsSource for MockSource {
    type Connection = MockConnection;

    async fn connect(&self, uri: &str) -> Result<MockConnection, SourceError> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(SourceError::Connect {
                uri: uri.to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MockSource`].
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn domain(&self, entity: &EntityHandle) -> Result<MockDomain, SourceError> {
        self.state
            .lock()
            .domains
            .get(entity.uuid())
            .cloned()
            .ok_or_else(|| SourceError::UnknownDomain(entity.uuid().to_string()))
    }

    fn stats_domain(
        &self,
        entity: &EntityHandle,
        command: &str,
    ) -> Result<MockDomain, SourceError> {
        let domain = self.domain(entity)?;
        if domain.fail_stats {
            return Err(SourceError::Command {
                command: format!("{} {}", command, entity),
                message: "domain is not running".to_string(),
            });
        }
        Ok(domain)
    }
}

#[async_trait]
impl StatsConnection for MockConnection {
    async fn list_entities(&self) -> Result<Vec<EntityHandle>, SourceError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        let uuids = match state.polls.pop_front() {
            Some(poll) => poll,
            None => state.domains.keys().cloned().collect(),
        };
        Ok(uuids.into_iter().map(EntityHandle::new).collect())
    }

    async fn cpu_stats(&self, entity: &EntityHandle) -> Result<CpuStats, SourceError> {
        Ok(self.stats_domain(entity, "domstats")?.cpu)
    }

    async fn memory_stats(&self, entity: &EntityHandle) -> Result<RawStats, SourceError> {
        Ok(RawStats::Map(self.stats_domain(entity, "dommemstat")?.memory))
    }

    async fn device_topology(
        &self,
        entity: &EntityHandle,
    ) -> Result<DeviceTopology, SourceError> {
        let domain = self.domain(entity)?;
        Ok(DeviceTopology::new(
            domain.disks.iter().map(|(target, _)| target.clone()).collect(),
            domain
                .interfaces
                .iter()
                .map(|(target, _)| target.clone())
                .collect(),
        ))
    }

    async fn block_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<BlockStats, SourceError> {
        let domain = self.domain(entity)?;
        domain.check_target(target, "domblkstat")?;
        domain
            .disks
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, stats)| *stats)
            .ok_or_else(|| SourceError::Command {
                command: format!("domblkstat {}", target),
                message: "no such disk".to_string(),
            })
    }

    async fn interface_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<InterfaceStats, SourceError> {
        let domain = self.domain(entity)?;
        domain.check_target(target, "domifstat")?;
        domain
            .interfaces
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, stats)| *stats)
            .ok_or_else(|| SourceError::Command {
                command: format!("domifstat {}", target),
                message: "no such interface".to_string(),
            })
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.state.lock().closes += 1;
        Ok(())
    }
}
