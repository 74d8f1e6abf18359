//! Prometheus exporter for libvirt domain statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use virtsight_exporter::source::{BlockStats, InterfaceStats};
use virtsight_exporter::{
    CycleSettings, DomainFilter, ExporterConfig, HttpServer, MetricRegistry, MockDomain,
    MockSource, Scheduler, SharedRegistry, SharedStats, StatsSource, VirshSource,
};

/// Prometheus exporter for libvirt domain statistics.
#[derive(Parser, Debug)]
#[command(name = "virtsight-exporter")]
#[command(about = "Export libvirt domain statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Libvirt connection URI (overrides config).
    #[arg(short, long)]
    uri: Option<String>,

    /// Scrape interval in seconds (overrides config).
    #[arg(short = 'i', long)]
    scrape_interval: Option<u64>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Serve scripted statistics from an in-memory source instead of libvirt.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // Command line wins over the file
    if let Some(uri) = args.uri {
        config.libvirt.uri = uri;
    }
    if let Some(interval) = args.scrape_interval {
        config.libvirt.scrape_interval_secs = interval;
    }
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    virtsight_common::init_tracing(&config.logging)?;

    info!(
        uri = %config.libvirt.uri,
        interval_secs = config.libvirt.scrape_interval_secs,
        demo = args.demo,
        "Starting virtsight libvirt exporter"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry: SharedRegistry = Arc::new(MetricRegistry::default());
    let settings = CycleSettings::new(config.libvirt.uri.clone(), config.libvirt.scrape_interval())
        .with_filter(DomainFilter::new(&config.filters));

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (scheduler_task, stats) = if args.demo {
        spawn_scheduler(demo_source(), registry.clone(), settings, shutdown_rx.clone())
    } else {
        spawn_scheduler(
            VirshSource::from_config(&config.libvirt),
            registry.clone(),
            settings,
            shutdown_rx.clone(),
        )
    };

    let http_server = HttpServer::new(
        registry.clone(),
        stats.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_signal().await;

    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = scheduler_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = stats.read().clone();
    info!(
        cycles_completed = stats.cycles_completed,
        cycles_failed = stats.cycles_failed,
        domains = stats.domains,
        series_count = registry.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

fn spawn_scheduler<S>(
    source: S,
    registry: SharedRegistry,
    settings: CycleSettings,
    shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, SharedStats)
where
    S: StatsSource + 'static,
{
    let scheduler = Scheduler::new(source, registry, settings);
    let stats = scheduler.stats();
    (tokio::spawn(scheduler.run(shutdown)), stats)
}

/// Two domains with fixed counters, enough to exercise every family.
fn demo_source() -> MockSource {
    let disk = BlockStats {
        read_requests: 1520,
        read_bytes: 31_205_376,
        write_requests: 390,
        write_bytes: 4_493_312,
        errors: 0,
    };
    let nic = InterfaceStats {
        rx_bytes: 6720,
        rx_packets: 80,
        tx_bytes: 12040,
        tx_packets: 95,
        ..Default::default()
    };

    MockSource::new()
        .with_domain(
            "00000000-0000-0000-0000-000000000001",
            MockDomain::new()
                .with_cpu(2_000_000_000, 2)
                .with_memory(&[("actual", 2_097_152.0), ("rss", 1_048_576.0)])
                .with_disk("vda", disk)
                .with_interface("vnet0", nic),
        )
        .with_domain(
            "00000000-0000-0000-0000-000000000002",
            MockDomain::new()
                .with_cpu(500_000_000, 1)
                .with_memory(&[("actual", 1_048_576.0), ("rss", 524_288.0)])
                .with_disk("vda", disk)
                .with_disk("vdb", disk),
        )
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to wait for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}
