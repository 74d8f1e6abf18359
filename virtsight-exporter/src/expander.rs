//! Fan-out of per-device statistics into per-target samples.

use tracing::{trace, warn};
use virtsight_common::{Labels, MetricCollection, Sample};

use crate::error::CollectError;
use crate::family::DOMAIN_LABEL;
use crate::source::{EntityHandle, StatsConnection};
use crate::topology::DeviceKind;

/// Collect one sample per device target for each metric name.
///
/// Targets come from the domain's current topology, in document order, and
/// each target's counters are fetched with a separate call. The counters are
/// matched to `metric_names` by position. Labels are
/// `{domain, target_<kind>}`.
///
/// A target whose query fails, or whose counter list is shorter than
/// `metric_names`, is logged and left out; the remaining targets are still
/// collected. A domain without targets of `kind` yields an empty sequence for
/// every metric name. Only a topology lookup failure is returned as an error.
pub async fn expand<C, N>(
    conn: &C,
    entity: &EntityHandle,
    metric_names: &[N],
    kind: DeviceKind,
) -> Result<MetricCollection, CollectError>
where
    C: StatsConnection + ?Sized,
    N: AsRef<str>,
{
    let topology = conn.device_topology(entity).await?;

    let mut collection: MetricCollection = metric_names
        .iter()
        .map(|name| (name.as_ref().to_string(), Vec::new()))
        .collect();

    for target in topology.targets(kind) {
        let counters = match query_target(conn, entity, target, kind).await {
            Ok(counters) => counters,
            Err(e) => {
                warn!(domain = %entity, target = %target, error = %e, "Skipping device target");
                continue;
            }
        };

        if let Some(missing) = metric_names.get(counters.len()) {
            let e = CollectError::MissingMetric {
                metric: missing.as_ref().to_string(),
            };
            warn!(domain = %entity, target = %target, error = %e, "Skipping device target");
            continue;
        }

        let labels = Labels::new()
            .with(DOMAIN_LABEL, entity.uuid())
            .with(kind.label_key(), target.as_str());

        for (name, value) in metric_names.iter().zip(counters) {
            if let Some(samples) = collection.get_mut(name.as_ref()) {
                samples.push(Sample::new(value, labels.clone()));
            }
        }

        trace!(domain = %entity, target = %target, kind = %kind, "Collected device counters");
    }

    Ok(collection)
}

async fn query_target<C>(
    conn: &C,
    entity: &EntityHandle,
    target: &str,
    kind: DeviceKind,
) -> Result<Vec<f64>, CollectError>
where
    C: StatsConnection + ?Sized,
{
    let counters = match kind {
        DeviceKind::Disk => conn
            .block_stats(entity, target)
            .await
            .map(|stats| stats.counters().to_vec()),
        DeviceKind::Interface => conn
            .interface_stats(entity, target)
            .await
            .map(|stats| stats.counters().to_vec()),
    };

    counters.map_err(|source| CollectError::DeviceQuery {
        target: target.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{BLOCK_METRICS, INTERFACE_METRICS};
    use crate::mock::{MockDomain, MockSource};
    use crate::source::{BlockStats, InterfaceStats, StatsSource};

    fn disk(read_bytes: i64) -> BlockStats {
        BlockStats {
            read_requests: 1,
            read_bytes,
            write_requests: 2,
            write_bytes: 4096,
            errors: 0,
        }
    }

    #[tokio::test]
    async fn test_expand_disks() {
        let source = MockSource::new().with_domain(
            "vm-1",
            MockDomain::new()
                .with_disk("vda", disk(100))
                .with_disk("vdb", disk(200)),
        );
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-1");

        let collection = expand(&conn, &entity, &BLOCK_METRICS, DeviceKind::Disk)
            .await
            .unwrap();

        assert_eq!(collection.len(), BLOCK_METRICS.len());
        let read_bytes = &collection["read_bytes"];
        assert_eq!(read_bytes.len(), 2);
        assert_eq!(read_bytes[0].value, 100.0);
        assert_eq!(read_bytes[0].labels.get("target_disk"), Some("vda"));
        assert_eq!(read_bytes[1].value, 200.0);
        assert_eq!(read_bytes[1].labels.get("target_disk"), Some("vdb"));
        assert_eq!(read_bytes[1].labels.get("domain"), Some("vm-1"));

        let keys: Vec<_> = read_bytes[0].labels.keys().collect();
        assert_eq!(keys, vec!["domain", "target_disk"]);
    }

    #[tokio::test]
    async fn test_expand_interfaces() {
        let stats = InterfaceStats {
            rx_bytes: 1500,
            tx_drops: 3,
            ..Default::default()
        };
        let source = MockSource::new()
            .with_domain("vm-1", MockDomain::new().with_interface("vnet0", stats));
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-1");

        let collection = expand(&conn, &entity, &INTERFACE_METRICS, DeviceKind::Interface)
            .await
            .unwrap();

        assert_eq!(collection["read_bytes"][0].value, 1500.0);
        assert_eq!(collection["write_drops"][0].value, 3.0);
        assert_eq!(
            collection["write_drops"][0].labels.get("target_interface"),
            Some("vnet0")
        );
    }

    #[tokio::test]
    async fn test_expand_without_targets() {
        let source = MockSource::new().with_domain("vm-1", MockDomain::new());
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-1");

        let collection = expand(&conn, &entity, &BLOCK_METRICS, DeviceKind::Disk)
            .await
            .unwrap();

        assert_eq!(collection.len(), BLOCK_METRICS.len());
        assert!(collection.values().all(|samples| samples.is_empty()));
    }

    #[tokio::test]
    async fn test_expand_skips_failing_target() {
        let source = MockSource::new().with_domain(
            "vm-1",
            MockDomain::new()
                .with_disk("vda", disk(100))
                .with_disk("vdb", disk(200))
                .with_failing_target("vda"),
        );
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-1");

        let collection = expand(&conn, &entity, &BLOCK_METRICS, DeviceKind::Disk)
            .await
            .unwrap();

        let read_bytes = &collection["read_bytes"];
        assert_eq!(read_bytes.len(), 1);
        assert_eq!(read_bytes[0].labels.get("target_disk"), Some("vdb"));
    }

    #[tokio::test]
    async fn test_expand_skips_target_with_too_few_counters() {
        let source = MockSource::new()
            .with_domain("vm-1", MockDomain::new().with_disk("vda", disk(100)));
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-1");

        let mut names: Vec<&str> = BLOCK_METRICS.to_vec();
        names.push("flush_operations");

        let collection = expand(&conn, &entity, &names, DeviceKind::Disk)
            .await
            .unwrap();

        assert_eq!(collection.len(), names.len());
        assert!(collection.values().all(|samples| samples.is_empty()));
    }

    #[tokio::test]
    async fn test_expand_unknown_domain_fails() {
        let source = MockSource::new();
        let conn = source.connect("test:///default").await.unwrap();
        let entity = EntityHandle::new("vm-404");

        let result = expand(&conn, &entity, &BLOCK_METRICS, DeviceKind::Disk).await;

        assert!(matches!(result, Err(CollectError::Source(_))));
    }
}
