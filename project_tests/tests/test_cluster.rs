//! Cluster behaviour: mirrored registration, single-holder delivery and
//! member independence.

use lib_ctapi::configs::SiteConfig;
use lib_ctapi::simulator::SimulatedHost;
use lib_ctapi::{ClusterConnection, ConnectionConfig, ConnectionState, Endpoint, TagValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn endpoints(hosts: &[&str]) -> Vec<Endpoint> {
    hosts.iter().map(|h| Endpoint::new(*h, "engineer", "control")).collect()
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        scan_interval_ms: 5,
        backoff_floor_ms: 20,
        backoff_ceiling_ms: 100,
        token_wait_ms: 10,
        ..Default::default()
    }
}

async fn wait_for<P: Fn() -> bool>(what: &str, predicate: P) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_empty_cluster_is_rejected() {
    let result = ClusterConnection::spawn(Vec::new(), SimulatedHost::new(), fast_config());
    assert!(result.is_err());
}

#[tokio::test]
async fn test_registration_is_mirrored_to_every_member() {
    let host = SimulatedHost::new();
    host.define_tag("T", TagValue::Integer(0));
    let cluster = ClusterConnection::spawn(endpoints(&["a", "b"]), host.clone(), fast_config()).unwrap();

    cluster.add_list("L");
    cluster.add_tag("L", "T");
    cluster.add_list("L");
    wait_for("every member converged", || {
        cluster.members().iter().all(|m| {
            let snap = m.snapshot();
            snap.converged() && snap.tags_active.len() == 1
        })
    })
    .await;

    assert_eq!(host.lists_created(), 2);
    assert_eq!(host.sessions_opened(), 2);
    cluster.stop().await;
    assert!(cluster.members().iter().all(|m| m.state() == ConnectionState::Stopped));
    assert_eq!(host.sessions_closed(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_member_gets_a_turn_under_the_per_cycle_token() {
    let host = SimulatedHost::new();
    host.define_tag("T", TagValue::Integer(0));
    let cluster = ClusterConnection::spawn(endpoints(&["a", "b", "c"]), host.clone(), fast_config()).unwrap();

    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let senders: Arc<Mutex<Vec<String>>> = Arc::default();
    let (i, o, s) = (Arc::clone(&inside), Arc::clone(&overlaps), Arc::clone(&senders));

    cluster.add_list("L");
    cluster.add_tag("L", "T");
    cluster.subscribe("L", move |batch| {
        if i.fetch_add(1, Ordering::SeqCst) > 0 {
            o.fetch_add(1, Ordering::SeqCst);
        }
        s.lock().unwrap().push(batch.host.clone());
        std::thread::sleep(Duration::from_millis(1));
        i.fetch_sub(1, Ordering::SeqCst);
    });
    wait_for("converged", || {
        cluster.members().iter().all(|m| m.snapshot().tags_active.len() == 1)
    })
    .await;

    let mut n = 0;
    while !["a", "b", "c"].iter().all(|h| senders.lock().unwrap().iter().any(|s| s == h)) {
        n += 1;
        assert!(n < 1000, "some member never delivered: {:?}", senders.lock().unwrap());
        host.set_value("T", TagValue::Integer(n));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cluster.stop().await;

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_site_config_applies_to_a_cluster() {
    let site = SiteConfig::from_json5_str(
        r#"{
            endpoints: [
                { host: "primary", username: "u", password: "p" },
                { host: "standby", username: "u", password: "p" },
            ],
            connection: { scanIntervalMs: 5, tokenPolicy: "sticky" },
            lists: { valves: ["V1", "V2"], motors: [{ name: "M1", pollPeriodMs: 100 }] },
        }"#,
    )
    .unwrap();
    let host = SimulatedHost::new();
    for tag in ["V1", "V2", "M1"] {
        host.define_tag(tag, TagValue::Integer(0));
    }

    let cluster = ClusterConnection::spawn(site.endpoints.clone(), host.clone(), site.connection.clone()).unwrap();
    site.apply_to(&cluster);
    wait_for("both members converged", || {
        cluster.members().iter().all(|m| m.snapshot().tags_active.len() == 3)
    })
    .await;

    let hosts: Vec<&str> = cluster.members().iter().map(|m| m.host()).collect();
    assert_eq!(hosts, vec!["primary", "standby"]);
    cluster.stop().await;
}
