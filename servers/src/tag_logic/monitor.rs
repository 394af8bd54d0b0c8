use lib_ctapi::configs::SiteConfig;
use lib_ctapi::simulator::SimulatedHost;
use lib_ctapi::{EventBatch, TagValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Subscriber printing every batch as one JSON line.
pub fn log_batch(batch: Arc<EventBatch>) {
    match serde_json::to_string(&*batch) {
        Ok(line) => log::info!("{}", line),
        Err(e) => log::error!("Failed to serialize batch from {}: {}", batch.list, e),
    }
}

/// Creates every configured tag on the simulated host with a zero value.
pub fn seed_host(host: &SimulatedHost, site: &SiteConfig) {
    for tags in site.lists.values() {
        for tag in tags {
            host.define_tag(tag.name(), TagValue::Integer(0));
        }
    }
}

/// Bumps one configured tag per tick, round robin, until cancelled.
pub async fn drive_changes(host: SimulatedHost, site: SiteConfig, every: Duration, cancel: CancellationToken) {
    let names: Vec<String> = site
        .lists
        .values()
        .flatten()
        .map(|t| t.name().to_string())
        .collect();
    if names.is_empty() {
        return;
    }

    let mut ticker = interval(every);
    let mut step: i64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Simulated value driver stopped.");
                break;
            }
            _ = ticker.tick() => {
                step += 1;
                let name = &names[(step as usize - 1) % names.len()];
                log::debug!("Simulating change {} = {}", name, step);
                host.set_value(name, TagValue::Integer(step));
            }
        }
    }
}

/// Waits for the value driver and logs it if it panicked or was aborted.
/// Returns whether it ended cleanly.
pub async fn join_driver(driver: JoinHandle<()>) -> bool {
    match driver.await {
        Ok(()) => true,
        Err(e) => {
            log::error!("Simulated value driver ended abnormally: {}", e);
            false
        }
    }
}
