//! Scrape-time metric storage and text exposition.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{trace, warn};

/// Destination for metric values, rendered when scraped.
///
/// The collection engine writes through this trait and never formats wire
/// text itself.
pub trait MetricsSink: Send + Sync {
    /// Handle to one exposed gauge.
    type Gauge: Clone + Send + Sync;

    /// Handle to one exposed counter.
    type Counter: Clone + Send + Sync;

    /// Expose a gauge with the given ordered label keys.
    ///
    /// Idempotent per name: exposing an existing name returns its handle.
    fn expose_gauge(&self, name: &str, help: &str, label_keys: &[String]) -> Self::Gauge;

    /// Set the value of one series. `label_values` follow the key order the
    /// gauge was exposed with.
    fn set_value(&self, gauge: &Self::Gauge, label_values: &[String], value: f64);

    /// Expose a monotonic counter. `name` carries its `_total` suffix.
    ///
    /// Idempotent per name, like [`expose_gauge`](Self::expose_gauge).
    fn expose_counter(&self, name: &str, help: &str, label_keys: &[String]) -> Self::Counter;

    /// Add `by` to one counter series, creating it at zero first.
    fn increment(&self, counter: &Self::Counter, label_values: &[String], by: u64);

    /// Render every exposed metric in text exposition format.
    fn render(&self) -> String;
}

type GaugeFamily = Family<Vec<(String, String)>, Gauge<f64, AtomicU64>>;
type CounterFamily = Family<Vec<(String, String)>, Counter>;

/// Gauge handle of a [`PrometheusSink`].
#[derive(Debug, Clone)]
pub struct PrometheusGauge {
    label_keys: Arc<[String]>,
    family: GaugeFamily,
}

/// Counter handle of a [`PrometheusSink`].
#[derive(Debug, Clone)]
pub struct PrometheusCounter {
    label_keys: Arc<[String]>,
    family: CounterFamily,
}

fn label_pairs(keys: &[String], values: &[String]) -> Vec<(String, String)> {
    keys.iter().cloned().zip(values.iter().cloned()).collect()
}

/// [`MetricsSink`] backed by a `prometheus-client` registry.
///
/// Rendering only takes the registry read lock; each gauge family guards its
/// own series, so a scrape never waits for a whole collection cycle.
pub struct PrometheusSink {
    registry: RwLock<Registry>,
    gauges: Mutex<HashMap<String, PrometheusGauge>>,
    counters: Mutex<HashMap<String, PrometheusCounter>>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            gauges: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Number of exposed gauges.
    pub fn gauge_count(&self) -> usize {
        self.gauges.lock().len()
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusSink {
    type Gauge = PrometheusGauge;
    type Counter = PrometheusCounter;

    fn expose_gauge(&self, name: &str, help: &str, label_keys: &[String]) -> PrometheusGauge {
        let mut gauges = self.gauges.lock();
        if let Some(existing) = gauges.get(name) {
            return existing.clone();
        }

        let gauge = PrometheusGauge {
            label_keys: label_keys.into(),
            family: GaugeFamily::default(),
        };
        self.registry
            .write()
            .register(name, help, gauge.family.clone());
        gauges.insert(name.to_string(), gauge.clone());

        trace!(metric = %name, labels = ?label_keys, "Exposed gauge");
        gauge
    }

    fn set_value(&self, gauge: &PrometheusGauge, label_values: &[String], value: f64) {
        let labels = label_pairs(&gauge.label_keys, label_values);
        gauge.family.get_or_create(&labels).set(value);
    }

    fn expose_counter(&self, name: &str, help: &str, label_keys: &[String]) -> PrometheusCounter {
        let mut counters = self.counters.lock();
        if let Some(existing) = counters.get(name) {
            return existing.clone();
        }

        let counter = PrometheusCounter {
            label_keys: label_keys.into(),
            family: CounterFamily::default(),
        };
        // The encoder appends `_total` to counters itself.
        let base = name.strip_suffix("_total").unwrap_or(name);
        self.registry
            .write()
            .register(base, help, counter.family.clone());
        counters.insert(name.to_string(), counter.clone());

        trace!(metric = %name, labels = ?label_keys, "Exposed counter");
        counter
    }

    fn increment(&self, counter: &PrometheusCounter, label_values: &[String], by: u64) {
        let labels = label_pairs(&counter.label_keys, label_values);
        counter.family.get_or_create(&labels).inc_by(by);
    }

    fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry.read()) {
            warn!(error = %e, "Failed to encode metrics");
        }
        output
    }
}
