//! Registry of exposed metric descriptors.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use virtsight_common::{Labels, Sample};

use crate::error::CollectError;
use crate::sink::{MetricsSink, PrometheusSink};

/// Registered shape and current values of one exposed metric.
#[derive(Debug)]
pub struct MetricDescriptor<G> {
    name: String,
    /// Fixed at creation.
    label_keys: Vec<String>,
    gauge: G,
    values: HashMap<Vec<String>, f64>,
}

impl<G> MetricDescriptor<G> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label_keys(&self) -> &[String] {
        &self.label_keys
    }

    /// Number of distinct label-value combinations seen.
    pub fn series_count(&self) -> usize {
        self.values.len()
    }
}

/// Owner of every exposed metric descriptor.
///
/// Descriptors are created the first time a metric name is recorded and
/// reused for the lifetime of the process. Label-value combinations are only
/// ever added or overwritten: a target that disappears keeps its last value.
///
/// There is a single writer (the scheduler task). Scrapes read through the
/// sink, which synchronizes per metric, so they see every completed write
/// without waiting for the rest of a cycle.
pub struct MetricRegistry<S: MetricsSink = PrometheusSink> {
    sink: Arc<S>,
    descriptors: RwLock<HashMap<String, MetricDescriptor<S::Gauge>>>,
    counters: RwLock<HashMap<String, CounterDescriptor<S::Counter>>>,
}

/// A monotonic counter and its running totals.
struct CounterDescriptor<C> {
    label_keys: Vec<String>,
    counter: C,
    totals: HashMap<Vec<String>, u64>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl<S: MetricsSink> MetricRegistry<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            descriptors: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Record a batch of samples for `metric_name + unit`.
    ///
    /// On first sight the label keys of the first sample, in their order,
    /// become the metric's schema. Every sample must carry exactly that key
    /// set (in any order), otherwise nothing from the batch is written and
    /// [`CollectError::LabelSchemaMismatch`] is returned. An empty batch is a
    /// no-op. Returns the number of samples written.
    pub fn record_batch(
        &self,
        metric_name: &str,
        unit: &str,
        samples: &[Sample],
    ) -> Result<usize, CollectError> {
        let full_name = format!("{}{}", metric_name, unit);
        let help = help_text(&full_name);
        self.record_described(&full_name, &help, samples)
    }

    /// Like [`record_batch`](Self::record_batch) for an already complete
    /// name, with explicit help text used if the metric is new.
    pub fn record_described(
        &self,
        full_name: &str,
        help: &str,
        samples: &[Sample],
    ) -> Result<usize, CollectError> {
        let Some(first) = samples.first() else {
            return Ok(0);
        };

        let mut descriptors = self.descriptors.write();

        let descriptor = match descriptors.entry(full_name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let label_keys: Vec<String> = first.labels.keys().map(str::to_string).collect();
                let gauge = self.sink.expose_gauge(entry.key(), help, &label_keys);
                debug!(metric = %entry.key(), labels = ?label_keys, "Registered metric");

                let name = entry.key().clone();
                entry.insert(MetricDescriptor {
                    name,
                    label_keys,
                    gauge,
                    values: HashMap::new(),
                })
            }
        };

        let mut rows = Vec::with_capacity(samples.len());
        for sample in samples {
            let values = sample
                .labels
                .values_for(&descriptor.label_keys)
                .ok_or_else(|| CollectError::LabelSchemaMismatch {
                    metric: descriptor.name.clone(),
                    expected: descriptor.label_keys.clone(),
                    found: sample.labels.keys().map(str::to_string).collect(),
                })?;
            rows.push((values, sample.value));
        }

        let written = rows.len();
        for (values, value) in rows {
            self.sink.set_value(&descriptor.gauge, &values, value);
            descriptor.values.insert(values, value);
        }

        Ok(written)
    }

    /// Add `by` to a counter series and return its new total.
    ///
    /// `name` is the exposed name, `_total` suffix included. The label keys
    /// of the first call become the counter's schema, as for gauges. An
    /// increment of zero still creates the series.
    pub fn increment_counter(
        &self,
        name: &str,
        help: &str,
        labels: &Labels,
        by: u64,
    ) -> Result<u64, CollectError> {
        let mut counters = self.counters.write();
        let descriptor = match counters.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let label_keys: Vec<String> = labels.keys().map(str::to_string).collect();
                let counter = self.sink.expose_counter(name, help, &label_keys);
                debug!(metric = %name, labels = ?label_keys, "Registered counter");
                entry.insert(CounterDescriptor {
                    label_keys,
                    counter,
                    totals: HashMap::new(),
                })
            }
        };

        let values = labels.values_for(&descriptor.label_keys).ok_or_else(|| {
            CollectError::LabelSchemaMismatch {
                metric: name.to_string(),
                expected: descriptor.label_keys.clone(),
                found: labels.keys().map(str::to_string).collect(),
            }
        })?;

        self.sink.increment(&descriptor.counter, &values, by);
        let total = descriptor.totals.entry(values).or_insert(0);
        *total += by;
        Ok(*total)
    }

    /// Current value of one series, label values in schema order.
    ///
    /// Counters are looked up by their exposed `_total` name.
    pub fn value(&self, metric: &str, label_values: &[&str]) -> Option<f64> {
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        if let Some(d) = self.descriptors.read().get(metric) {
            return d.values.get(&key).copied();
        }
        self.counters
            .read()
            .get(metric)
            .and_then(|c| c.totals.get(&key).map(|total| *total as f64))
    }

    /// Label schema of a registered metric.
    pub fn label_keys(&self, metric: &str) -> Option<Vec<String>> {
        if let Some(d) = self.descriptors.read().get(metric) {
            return Some(d.label_keys.clone());
        }
        self.counters
            .read()
            .get(metric)
            .map(|c| c.label_keys.clone())
    }

    /// Number of series of a registered metric.
    pub fn metric_series_count(&self, metric: &str) -> Option<usize> {
        self.descriptors.read().get(metric).map(|d| d.series_count())
    }

    /// Registered metric names, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.descriptors.read().keys().cloned().collect();
        names.extend(self.counters.read().keys().cloned());
        names.sort();
        names
    }

    /// Number of registered metrics.
    pub fn metric_count(&self) -> usize {
        self.descriptors.read().len() + self.counters.read().len()
    }

    /// Total number of series across all metrics.
    pub fn series_count(&self) -> usize {
        let gauges: usize = self
            .descriptors
            .read()
            .values()
            .map(|d| d.series_count())
            .sum();
        let counters: usize = self.counters.read().values().map(|c| c.totals.len()).sum();
        gauges + counters
    }

    /// Render the current state through the sink.
    pub fn render(&self) -> String {
        self.sink.render()
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }
}

impl Default for MetricRegistry<PrometheusSink> {
    fn default() -> Self {
        Self::new(Arc::new(PrometheusSink::new()))
    }
}

fn help_text(metric: &str) -> String {
    format!("Domain statistic {}", metric)
}
