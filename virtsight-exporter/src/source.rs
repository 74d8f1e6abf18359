//! Hypervisor statistics source abstraction.
//!
//! The collection engine never talks to libvirt directly. It asks a
//! [`StatsSource`] for a connection and pulls raw statistics through the
//! [`StatsConnection`] it returns:
//! - [`VirshSource`](crate::virsh::VirshSource): shells out to `virsh`
//! - [`MockSource`](crate::mock::MockSource): scripted, in-memory

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::SourceError;
use crate::topology::DeviceTopology;

/// A running domain discovered during a collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    uuid: String,
}

impl EntityHandle {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }

    /// Stable domain identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl std::fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uuid)
    }
}

/// Cumulative CPU time of a domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStats {
    /// Cumulative CPU time samples in nanoseconds (one per reported CPU).
    pub cpu_time_ns: Vec<u64>,
    /// Number of virtual CPUs the domain currently runs with.
    pub vcpu_count: u32,
}

impl CpuStats {
    pub fn new(cpu_time_ns: Vec<u64>, vcpu_count: u32) -> Self {
        Self {
            cpu_time_ns,
            vcpu_count,
        }
    }

    /// Total CPU time per vCPU in units of 10ms.
    ///
    /// The per-second derivative of this value is the average busy
    /// percentage of one vCPU. Returns 0 for a domain reporting no vCPUs.
    pub fn normalized(&self) -> f64 {
        if self.vcpu_count == 0 {
            return 0.0;
        }
        let total: u64 = self.cpu_time_ns.iter().sum();
        total as f64 / f64::from(self.vcpu_count) / 10_000_000.0
    }
}

/// Raw statistics in one of the shapes the hypervisor hands out.
#[derive(Debug, Clone, PartialEq)]
pub enum RawStats {
    /// Named scalar counters.
    Map(IndexMap<String, f64>),
    /// A list of named scalar counters; only the first element is meaningful.
    List(Vec<IndexMap<String, f64>>),
}

impl RawStats {
    /// Build a map-shaped value from `(name, value)` pairs.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        RawStats::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn fields(&self) -> Option<&IndexMap<String, f64>> {
        match self {
            RawStats::Map(map) => Some(map),
            RawStats::List(list) => list.first(),
        }
    }

    /// Look up one counter by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields().and_then(|fields| fields.get(name).copied())
    }

    /// Counter names in source order.
    pub fn metric_names(&self) -> Vec<String> {
        self.fields()
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Cumulative block device counters.
///
/// Values are signed because libvirt reports `-1` for unsupported counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub read_requests: i64,
    pub read_bytes: i64,
    pub write_requests: i64,
    pub write_bytes: i64,
    pub errors: i64,
}

impl BlockStats {
    /// Counters in `read_requests_issued, read_bytes, write_requests_issued,
    /// write_bytes, errors_number` order.
    pub fn counters(&self) -> [f64; 5] {
        [
            self.read_requests as f64,
            self.read_bytes as f64,
            self.write_requests as f64,
            self.write_bytes as f64,
            self.errors as f64,
        ]
    }
}

/// Cumulative network interface counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub rx_errors: i64,
    pub rx_drops: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
    pub tx_errors: i64,
    pub tx_drops: i64,
}

impl InterfaceStats {
    /// Counters in `read_bytes, read_packets, read_errors, read_drops,
    /// write_bytes, write_packets, write_errors, write_drops` order.
    pub fn counters(&self) -> [f64; 8] {
        [
            self.rx_bytes as f64,
            self.rx_packets as f64,
            self.rx_errors as f64,
            self.rx_drops as f64,
            self.tx_bytes as f64,
            self.tx_packets as f64,
            self.tx_errors as f64,
            self.tx_drops as f64,
        ]
    }
}

/// Factory for hypervisor sessions.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Session type handed out by [`connect`](Self::connect).
    type Connection: StatsConnection;

    /// Open a session against the hypervisor at `uri`.
    async fn connect(&self, uri: &str) -> Result<Self::Connection, SourceError>;
}

/// An open hypervisor session.
///
/// Per-device calls are made once per target per cycle; implementations do
/// not need to batch or cache.
#[async_trait]
pub trait StatsConnection: Send + Sync {
    /// Running domains. An empty list is a valid answer.
    async fn list_entities(&self) -> Result<Vec<EntityHandle>, SourceError>;

    /// Cumulative CPU time for a domain.
    async fn cpu_stats(&self, entity: &EntityHandle) -> Result<CpuStats, SourceError>;

    /// Balloon/memory counters for a domain, in source order.
    async fn memory_stats(&self, entity: &EntityHandle) -> Result<RawStats, SourceError>;

    /// Current disk and interface targets of a domain.
    async fn device_topology(
        &self,
        entity: &EntityHandle,
    ) -> Result<DeviceTopology, SourceError>;

    /// Counters of one disk target.
    async fn block_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<BlockStats, SourceError>;

    /// Counters of one interface target.
    async fn interface_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<InterfaceStats, SourceError>;

    /// Release the session.
    async fn close(&self) -> Result<(), SourceError>;
}
