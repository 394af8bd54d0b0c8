use anyhow::{Context, Result};
use lib_ctapi::configs::SiteConfig;
use lib_ctapi::loggers;
use lib_ctapi::simulator::SimulatedHost;
use lib_ctapi::ClusterConnection;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod tag_logic;
use tag_logic::{config, monitor, oneshot};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    loggers::setup_logging("server_tags", config.log_dir.as_deref(), config.log_level())?;

    let mut site = SiteConfig::load(config.site_path())
        .with_context(|| format!("Failed to load site file {}", config.site_path().display()))?;
    if let Some(scan) = config.scan_interval_ms {
        site.connection.scan_interval_ms = scan;
    }

    // No native CtAPI binding: every endpoint is served by one in-memory host.
    let host = SimulatedHost::new();
    monitor::seed_host(&host, &site);

    if let Some(command) = &config.command {
        let output = oneshot::run(&host, &site.endpoints[0], command).await?;
        println!("{}", output);
        return Ok(());
    }

    let cluster = ClusterConnection::spawn(site.endpoints.clone(), host.clone(), site.connection.clone())?;
    site.apply_to(&cluster);
    for list in site.lists.keys() {
        cluster.subscribe(list, monitor::log_batch);
    }
    log::info!(
        "Monitoring {} tags in {} lists on {} endpoints",
        site.tag_count(),
        site.lists.len(),
        site.endpoints.len()
    );

    let cancel = CancellationToken::new();
    let driver = match config.simulate_ms {
        Some(ms) if ms > 0 => Some(tokio::spawn(monitor::drive_changes(
            host.clone(),
            site.clone(),
            Duration::from_millis(ms),
            cancel.clone(),
        ))),
        _ => None,
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    cancel.cancel();
    if let Some(driver) = driver {
        monitor::join_driver(driver).await;
    }
    cluster.stop().await;

    log::info!("Shutdown complete.");
    Ok(())
}
