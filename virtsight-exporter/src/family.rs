//! Stat families and the shape each one is collected in.

use crate::mapping::build_metric_name;
use crate::topology::DeviceKind;

/// Label key identifying the domain on every sample.
pub const DOMAIN_LABEL: &str = "domain";

/// Metric suffix of the derived CPU usage.
pub const CPU_USED: &str = "cpu_used";

/// Block device counters, in the order a block stats call returns them.
pub const BLOCK_METRICS: [&str; 5] = [
    "read_requests_issued",
    "read_bytes",
    "write_requests_issued",
    "write_bytes",
    "errors_number",
];

/// Interface counters, in the order an interface stats call returns them.
pub const INTERFACE_METRICS: [&str; 8] = [
    "read_bytes",
    "read_packets",
    "read_errors",
    "read_drops",
    "write_bytes",
    "write_packets",
    "write_errors",
    "write_drops",
];

/// How a family's raw statistics turn into samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatShape {
    /// One value per named scalar counter, labeled with the domain.
    Scalar,
    /// One value derived from a cumulative counter through the rate tracker.
    SingleDerived,
    /// One value per device target and counter.
    MultiTarget(DeviceKind),
}

/// A group of related metrics collected together for each domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatFamily {
    Cpu,
    Memory,
    Block,
    Network,
}

impl StatFamily {
    /// Families in collection order.
    pub const ALL: [StatFamily; 4] = [
        StatFamily::Cpu,
        StatFamily::Memory,
        StatFamily::Block,
        StatFamily::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatFamily::Cpu => "cpu",
            StatFamily::Memory => "memory",
            StatFamily::Block => "block",
            StatFamily::Network => "network",
        }
    }

    /// Metric name prefix.
    pub fn header(&self) -> &'static str {
        match self {
            StatFamily::Cpu => "libvirt_cpu_stats_",
            StatFamily::Memory => "libvirt_mem_stats_",
            StatFamily::Block => "libvirt_block_stats_",
            StatFamily::Network => "libvirt_interface_",
        }
    }

    /// Unit suffix appended after the metric suffix.
    pub fn unit(&self) -> &'static str {
        match self {
            StatFamily::Cpu => "_percent",
            _ => "",
        }
    }

    /// Fixed metric suffixes. Memory counters are named by the source, so
    /// the memory family has none.
    pub fn metric_names(&self) -> &'static [&'static str] {
        match self {
            StatFamily::Cpu => &[CPU_USED],
            StatFamily::Memory => &[],
            StatFamily::Block => &BLOCK_METRICS,
            StatFamily::Network => &INTERFACE_METRICS,
        }
    }

    pub fn shape(&self) -> StatShape {
        match self {
            StatFamily::Cpu => StatShape::SingleDerived,
            StatFamily::Memory => StatShape::Scalar,
            StatFamily::Block => StatShape::MultiTarget(DeviceKind::Disk),
            StatFamily::Network => StatShape::MultiTarget(DeviceKind::Interface),
        }
    }

    /// Header plus suffix, without the unit.
    pub fn metric_name(&self, suffix: &str) -> String {
        build_metric_name(self.header(), suffix, "")
    }

    /// Fully qualified metric name as exposed to Prometheus.
    pub fn full_name(&self, suffix: &str) -> String {
        build_metric_name(self.header(), suffix, self.unit())
    }
}

impl std::fmt::Display for StatFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
