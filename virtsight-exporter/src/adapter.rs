//! Conversion of scalar-shaped raw statistics into labeled samples.

use virtsight_common::{Labels, MetricCollection, Sample};

use crate::error::CollectError;
use crate::source::RawStats;

/// Pair each requested counter with `labels`.
///
/// Every metric name maps to a one-element sample sequence so that the
/// result has the same shape as [`expand`](crate::expander::expand)'s
/// per-target output. Fails with [`CollectError::MissingMetric`] if a
/// requested name is absent from `raw`.
pub fn adapt<N: AsRef<str>>(
    metric_names: &[N],
    labels: &Labels,
    raw: &RawStats,
) -> Result<MetricCollection, CollectError> {
    let mut collection = MetricCollection::with_capacity(metric_names.len());

    for name in metric_names {
        let name = name.as_ref();
        let value = raw.get(name).ok_or_else(|| CollectError::MissingMetric {
            metric: name.to_string(),
        })?;
        collection.insert(name.to_string(), vec![Sample::new(value, labels.clone())]);
    }

    Ok(collection)
}
