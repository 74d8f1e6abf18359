//! [`StatsSource`] backed by the `virsh` command line client.
//!
//! Every call runs `virsh -c <uri> <command>` and parses its text output.
//! A connection is only the validated URI; no process outlives a call.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::LibvirtConfig;
use crate::error::SourceError;
use crate::source::{
    BlockStats, CpuStats, EntityHandle, InterfaceStats, RawStats, StatsConnection, StatsSource,
};
use crate::topology::DeviceTopology;

/// Value libvirt reports for a counter the driver does not support.
const UNSUPPORTED: i64 = -1;

/// Factory for [`VirshConnection`]s.
#[derive(Debug, Clone)]
pub struct VirshSource {
    binary: String,
    timeout: Duration,
}

impl VirshSource {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LibvirtConfig) -> Self {
        Self::new(config.virsh_path.clone(), config.command_timeout())
    }
}

#[async_trait]
impl StatsSource for VirshSource {
    type Connection = VirshConnection;

    async fn connect(&self, uri: &str) -> Result<VirshConnection, SourceError> {
        let conn = VirshConnection {
            binary: self.binary.clone(),
            uri: uri.to_string(),
            timeout: self.timeout,
        };

        // `virsh uri` fails unless the hypervisor accepts the connection
        conn.run(&["uri"])
            .await
            .map_err(|e| SourceError::Connect {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        debug!(uri = %uri, "Connected to hypervisor");
        Ok(conn)
    }
}

/// Session against one hypervisor URI.
#[derive(Debug, Clone)]
pub struct VirshConnection {
    binary: String,
    uri: String,
    timeout: Duration,
}

impl VirshConnection {
    /// Run one virsh command and return its standard output.
    async fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let command = format!("virsh {}", args.join(" "));
        trace!(uri = %self.uri, command = %command, "Running virsh");

        let output = Command::new(&self.binary)
            .arg("-c")
            .arg(&self.uri)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|e| SourceError::Command {
                command: command.clone(),
                message: format!("failed to spawn {}: {}", self.binary, e),
            })?,
            Err(_) => {
                return Err(SourceError::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(SourceError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| SourceError::Parse {
            command,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl StatsConnection for VirshConnection {
    async fn list_entities(&self) -> Result<Vec<EntityHandle>, SourceError> {
        let output = self.run(&["list", "--uuid"]).await?;
        Ok(parse_uuid_list(&output))
    }

    async fn cpu_stats(&self, entity: &EntityHandle) -> Result<CpuStats, SourceError> {
        let args = ["domstats", "--raw", "--cpu-total", "--vcpu", entity.uuid()];
        let output = self.run(&args).await?;
        parse_domstats_cpu(&output).map_err(|message| SourceError::Parse {
            command: args.join(" "),
            message,
        })
    }

    async fn memory_stats(&self, entity: &EntityHandle) -> Result<RawStats, SourceError> {
        let output = self.run(&["dommemstat", entity.uuid()]).await?;
        Ok(RawStats::Map(parse_memstats(&output)))
    }

    async fn device_topology(
        &self,
        entity: &EntityHandle,
    ) -> Result<DeviceTopology, SourceError> {
        let output = self.run(&["dumpxml", entity.uuid()]).await?;
        DeviceTopology::from_domain_xml(&output)
    }

    async fn block_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<BlockStats, SourceError> {
        let args = ["domblkstat", entity.uuid(), target];
        let output = self.run(&args).await?;
        let fields = parse_device_stats(&output);
        if fields.is_empty() {
            return Err(SourceError::Parse {
                command: args.join(" "),
                message: "no counters in output".to_string(),
            });
        }
        Ok(block_stats_from_fields(&fields))
    }

    async fn interface_stats(
        &self,
        entity: &EntityHandle,
        target: &str,
    ) -> Result<InterfaceStats, SourceError> {
        let args = ["domifstat", entity.uuid(), target];
        let output = self.run(&args).await?;
        let fields = parse_device_stats(&output);
        if fields.is_empty() {
            return Err(SourceError::Parse {
                command: args.join(" "),
                message: "no counters in output".to_string(),
            });
        }
        Ok(interface_stats_from_fields(&fields))
    }

    async fn close(&self) -> Result<(), SourceError> {
        trace!(uri = %self.uri, "Closing connection");
        Ok(())
    }
}

/// Parse `virsh list --uuid`: one UUID per line, blank lines ignored.
pub fn parse_uuid_list(output: &str) -> Vec<EntityHandle> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(EntityHandle::new)
        .collect()
}

/// Parse `virsh domstats --raw --cpu-total --vcpu` for one domain.
///
/// Uses `cpu.time` and `vcpu.current`, falling back to `vcpu.maximum` when a
/// driver does not report the current count.
pub fn parse_domstats_cpu(output: &str) -> Result<CpuStats, String> {
    let mut cpu_time = None;
    let mut vcpu_current = None;
    let mut vcpu_maximum = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        match key {
            "cpu.time" => cpu_time = value.parse::<u64>().ok(),
            "vcpu.current" => vcpu_current = value.parse::<u32>().ok(),
            "vcpu.maximum" => vcpu_maximum = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let cpu_time = cpu_time.ok_or_else(|| "missing cpu.time".to_string())?;
    let vcpus = vcpu_current
        .or(vcpu_maximum)
        .ok_or_else(|| "missing vcpu.current".to_string())?;

    Ok(CpuStats::new(vec![cpu_time], vcpus))
}

/// Parse `virsh dommemstat`: `<name> <value>` lines, in output order.
pub fn parse_memstats(output: &str) -> IndexMap<String, f64> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse::<f64>().ok()?;
            Some((name.to_string(), value))
        })
        .collect()
}

/// Parse `virsh domblkstat` / `virsh domifstat`: `<dev> <field> <value>`
/// lines.
pub fn parse_device_stats(output: &str) -> IndexMap<String, i64> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _device = parts.next()?;
            let field = parts.next()?;
            let value = parts.next()?.parse::<i64>().ok()?;
            Some((field.to_string(), value))
        })
        .collect()
}

fn field(fields: &IndexMap<String, i64>, name: &str) -> i64 {
    fields.get(name).copied().unwrap_or(UNSUPPORTED)
}

/// Counters the driver leaves out are reported as unsupported (`-1`).
pub fn block_stats_from_fields(fields: &IndexMap<String, i64>) -> BlockStats {
    BlockStats {
        read_requests: field(fields, "rd_req"),
        read_bytes: field(fields, "rd_bytes"),
        write_requests: field(fields, "wr_req"),
        write_bytes: field(fields, "wr_bytes"),
        errors: field(fields, "errs"),
    }
}

pub fn interface_stats_from_fields(fields: &IndexMap<String, i64>) -> InterfaceStats {
    InterfaceStats {
        rx_bytes: field(fields, "rx_bytes"),
        rx_packets: field(fields, "rx_packets"),
        rx_errors: field(fields, "rx_errs"),
        rx_drops: field(fields, "rx_drop"),
        tx_bytes: field(fields, "tx_bytes"),
        tx_packets: field(fields, "tx_packets"),
        tx_errors: field(fields, "tx_errs"),
        tx_drops: field(fields, "tx_drop"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_list() {
        let output = "4dea22b3-1d52-d8f3-2516-782e98ab3fa0\n\
                      9a1c3b27-8f0e-4a4c-b6a5-7c1e2f3d4b5a\n\n";
        let entities = parse_uuid_list(output);

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].uuid(), "4dea22b3-1d52-d8f3-2516-782e98ab3fa0");
        assert!(parse_uuid_list("\n").is_empty());
    }

    #[test]
    fn test_parse_domstats_cpu() {
        let output = "Domain: 'web01'\n\
                      \x20 cpu.time=2845000000\n\
                      \x20 cpu.user=1200000000\n\
                      \x20 cpu.system=900000000\n\
                      \x20 vcpu.current=2\n\
                      \x20 vcpu.maximum=4\n\
                      \x20 vcpu.0.state=1\n\
                      \x20 vcpu.0.time=1400000000\n";
        let stats = parse_domstats_cpu(output).unwrap();

        assert_eq!(stats.cpu_time_ns, vec![2_845_000_000]);
        assert_eq!(stats.vcpu_count, 2);
    }

    #[test]
    fn test_parse_domstats_cpu_falls_back_to_maximum() {
        let stats = parse_domstats_cpu("  cpu.time=10\n  vcpu.maximum=4\n").unwrap();
        assert_eq!(stats.vcpu_count, 4);
    }

    #[test]
    fn test_parse_domstats_cpu_missing_time() {
        let err = parse_domstats_cpu("  vcpu.current=1\n").unwrap_err();
        assert!(err.contains("cpu.time"));
    }

    #[test]
    fn test_parse_memstats_keeps_order() {
        let output = "actual 2097152\nswap_in 0\nrss 1048576\nlast_update 1712345678\n";
        let stats = parse_memstats(output);

        let names: Vec<_> = stats.keys().cloned().collect();
        assert_eq!(names, vec!["actual", "swap_in", "rss", "last_update"]);
        assert_eq!(stats["rss"], 1_048_576.0);
    }

    #[test]
    fn test_block_stats_from_output() {
        let output = "vda rd_req 1520\n\
                      vda rd_bytes 31205376\n\
                      vda wr_req 390\n\
                      vda wr_bytes 4493312\n\
                      vda flush_operations 120\n";
        let stats = block_stats_from_fields(&parse_device_stats(output));

        assert_eq!(stats.read_requests, 1520);
        assert_eq!(stats.read_bytes, 31_205_376);
        assert_eq!(stats.write_requests, 390);
        assert_eq!(stats.write_bytes, 4_493_312);
        assert_eq!(stats.errors, UNSUPPORTED);
    }

    #[test]
    fn test_interface_stats_from_output() {
        let output = "vnet0 rx_bytes 6720\n\
                      vnet0 rx_packets 80\n\
                      vnet0 rx_errs 0\n\
                      vnet0 rx_drop 1\n\
                      vnet0 tx_bytes 12040\n\
                      vnet0 tx_packets 95\n\
                      vnet0 tx_errs 0\n\
                      vnet0 tx_drop 2\n";
        let stats = interface_stats_from_fields(&parse_device_stats(output));

        assert_eq!(stats.counters(), [6720.0, 80.0, 0.0, 1.0, 12040.0, 95.0, 0.0, 2.0]);
    }

    #[tokio::test]
    async fn test_connect_with_missing_binary() {
        let source = VirshSource::new("/nonexistent/virsh", Duration::from_secs(1));
        let result = source.connect("qemu:///system").await;

        match result {
            Err(SourceError::Connect { uri, .. }) => assert_eq!(uri, "qemu:///system"),
            other => panic!("expected Connect error, got {:?}", other.map(|_| ())),
        }
    }
}
