//! Prometheus exporter for libvirt domain statistics.
//!
//! Polls a hypervisor on a fixed interval for per-domain CPU, memory, block
//! and network statistics and exposes the latest values via an HTTP
//! `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   StatsSource   │────>│ CollectionCycle │────>│ MetricRegistry  │────>│   HTTP Server   │
//! │ (virsh / mock)  │     │ (adapt, expand, │     │  (descriptors,  │     │   (/metrics)    │
//! └─────────────────┘     │      rate)      │     │      sink)      │     └─────────────────┘
//!                         └─────────────────┘     └─────────────────┘
//!                                  ^
//!                          Scheduler (fixed delay)
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! virtsight-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod adapter;
pub mod config;
pub mod cycle;
pub mod error;
pub mod expander;
pub mod family;
pub mod filter;
pub mod http;
pub mod mapping;
pub mod mock;
pub mod rate;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod topology;
pub mod virsh;

pub use config::ExporterConfig;
pub use cycle::{CollectionCycle, CycleOutcome, CycleReport, CycleSettings};
pub use error::{CollectError, SourceError};
pub use filter::DomainFilter;
pub use http::HttpServer;
pub use mock::{MockDomain, MockSource};
pub use rate::RateTracker;
pub use registry::{MetricRegistry, SharedRegistry};
pub use scheduler::{ExporterStats, Scheduler, SharedStats};
pub use sink::{MetricsSink, PrometheusSink};
pub use source::{EntityHandle, StatsConnection, StatsSource};
pub use virsh::VirshSource;
