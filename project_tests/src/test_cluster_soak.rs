//! # Cluster Soak Runner
//!
//! Runs a simulated cluster for a while, dropping every live link at a fixed
//! interval, and reports how many batches each member delivered and whether
//! two subscribers ever overlapped.

use clap::Parser;
use lib_ctapi::simulator::SimulatedHost;
use lib_ctapi::{ClusterConnection, ConnectionConfig, Endpoint, TagValue, TokenPolicy};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Soak test for a simulated CtAPI cluster")]
struct Args {
    /// Cluster members.
    #[clap(long, default_value_t = 3)]
    members: usize,
    /// Test duration in seconds.
    #[clap(long, default_value_t = 10)]
    seconds: u64,
    /// Drop every live link this often, in milliseconds.
    #[clap(long, default_value_t = 1500)]
    drop_every_ms: u64,
    /// Hold the token across cycles.
    #[clap(long)]
    sticky: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let host = SimulatedHost::new();
    for i in 0..10 {
        host.define_tag(&format!("T{}", i), TagValue::Integer(0));
    }

    let endpoints = (0..args.members)
        .map(|i| Endpoint::new(format!("member-{}", i), "engineer", "control"))
        .collect();
    let config = ConnectionConfig {
        scan_interval_ms: 10,
        backoff_floor_ms: 50,
        backoff_ceiling_ms: 400,
        token_policy: if args.sticky { TokenPolicy::Sticky } else { TokenPolicy::PerCycle },
        ..Default::default()
    };
    let cluster = ClusterConnection::spawn(endpoints, host.clone(), config)?;

    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let per_host: Arc<Mutex<BTreeMap<String, usize>>> = Arc::default();
    let (i, o, p) = (Arc::clone(&inside), Arc::clone(&overlaps), Arc::clone(&per_host));

    cluster.add_list("soak");
    for n in 0..10 {
        cluster.add_tag("soak", &format!("T{}", n));
    }
    cluster.subscribe("soak", move |batch| {
        if i.fetch_add(1, Ordering::SeqCst) > 0 {
            o.fetch_add(1, Ordering::SeqCst);
        }
        if let Ok(mut counts) = p.lock() {
            *counts.entry(batch.host.clone()).or_default() += 1;
        }
        i.fetch_sub(1, Ordering::SeqCst);
    });

    println!("[*] Soaking {} members for {}s...", args.members, args.seconds);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.seconds);
    let mut next_drop = tokio::time::Instant::now() + Duration::from_millis(args.drop_every_ms);
    let mut step: i64 = 0;
    while tokio::time::Instant::now() < deadline {
        step += 1;
        host.set_value(&format!("T{}", step % 10), TagValue::Integer(step));
        if tokio::time::Instant::now() >= next_drop {
            println!("[*] Dropping links (step {})", step);
            host.drop_link();
            next_drop += Duration::from_millis(args.drop_every_ms);
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    cluster.stop().await;

    println!("-----------------------------------------------");
    if let Ok(counts) = per_host.lock() {
        for (member, batches) in counts.iter() {
            println!("{:>12}: {} batches", member, batches);
        }
    }
    println!(
        "sessions opened {}, closed {}, overlaps {}",
        host.sessions_opened(),
        host.sessions_closed(),
        overlaps.load(Ordering::SeqCst)
    );
    println!("-----------------------------------------------");

    if overlaps.load(Ordering::SeqCst) > 0 {
        eprintln!("\n[ERROR] Subscribers overlapped");
        std::process::exit(1);
    }
    Ok(())
}
