//! # Cluster Connection
//!
//! Several connections, one per endpoint, that share a single delivery token.
//! Registrations and subscriptions are mirrored to every member; whichever
//! member holds the token is the only one invoking subscriber code.

use futures_util::future::join_all;
use std::sync::Arc;

use crate::connections::connection::Connection;
use crate::core::adapter::SessionFactory;
use crate::core::config::{ConnectionConfig, InvalidConfig};
use crate::core::model::{Endpoint, EventBatch, TagOptions};
use crate::core::token::DeliveryToken;

/// A group of connections delivering under mutual exclusion.
pub struct ClusterConnection {
    members: Vec<Connection>,
    token: DeliveryToken,
}

impl ClusterConnection {
    /// Starts one member per endpoint, all running with `config`.
    pub fn spawn<F>(
        endpoints: Vec<Endpoint>,
        factory: F,
        config: ConnectionConfig,
    ) -> Result<Self, InvalidConfig>
    where
        F: SessionFactory + Clone,
    {
        if endpoints.is_empty() {
            return Err(InvalidConfig("a cluster needs at least one endpoint".to_string()));
        }
        config.validate()?;

        let token = DeliveryToken::new();
        let mut members = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            log::info!("Adding cluster member {}", endpoint.host);
            members.push(Connection::spawn_with_token(
                endpoint,
                factory.clone(),
                config.clone(),
                Some(token.clone()),
            )?);
        }

        Ok(Self { members, token })
    }

    /// Requests a tag list on every member.
    pub fn add_list(&self, name: &str) {
        for member in &self.members {
            member.add_list(name);
        }
    }

    /// Requests a tag on every member with default options.
    pub fn add_tag(&self, list: &str, tag: &str) {
        self.add_tag_with(list, tag, TagOptions::default());
    }

    /// Requests a tag on every member.
    pub fn add_tag_with(&self, list: &str, tag: &str, options: TagOptions) {
        for member in &self.members {
            member.add_tag_with(list, tag, options.clone());
        }
    }

    /// Subscribes the same callback on every member.
    pub fn subscribe<C>(&self, list: &str, callback: C)
    where
        C: Fn(Arc<EventBatch>) + Send + Sync + 'static,
    {
        let callback: Arc<dyn Fn(Arc<EventBatch>) + Send + Sync> = Arc::new(callback);
        for member in &self.members {
            member.subscribe_shared(list, Arc::clone(&callback));
        }
    }

    /// Member connections in endpoint order.
    pub fn members(&self) -> &[Connection] {
        &self.members
    }

    /// The token the members deliver under.
    pub fn token(&self) -> &DeliveryToken {
        &self.token
    }

    /// Stops all members concurrently.
    pub async fn stop(&self) {
        join_all(self.members.iter().map(Connection::stop)).await;
        log::info!("Cluster stopped ({} members)", self.members.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TokenPolicy;
    use crate::core::model::TagValue;
    use crate::core::state::ConnectionState;
    use crate::simulator::SimulatedHost;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            scan_interval_ms: 5,
            backoff_floor_ms: 20,
            backoff_ceiling_ms: 100,
            token_wait_ms: 20,
            ..Default::default()
        }
    }

    fn endpoints(hosts: &[&str]) -> Vec<Endpoint> {
        hosts
            .iter()
            .map(|h| Endpoint::new(*h, "engineer", "control"))
            .collect()
    }

    async fn wait_for<P: Fn() -> bool>(what: &str, predicate: P) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribers_never_run_concurrently() {
        let host = SimulatedHost::new();
        host.define_tag("T", TagValue::Integer(0));
        let cluster =
            ClusterConnection::spawn(endpoints(&["a", "b", "c"]), host.clone(), fast_config()).unwrap();

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (i, m, c) = (Arc::clone(&inside), Arc::clone(&max_inside), Arc::clone(&calls));

        cluster.add_list("L");
        cluster.add_tag("L", "T");
        cluster.subscribe("L", move |_| {
            let now = i.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            i.fetch_sub(1, Ordering::SeqCst);
            c.fetch_add(1, Ordering::SeqCst);
        });
        wait_for("all members converged", || {
            cluster.members().iter().all(|m| m.snapshot().tags_active.len() == 1)
        })
        .await;

        for n in 1..=30 {
            host.set_value("T", TagValue::Integer(n));
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        wait_for("some deliveries", || calls.load(Ordering::SeqCst) >= 10).await;
        cluster.stop().await;

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!cluster.token().is_held());
    }

    #[tokio::test]
    async fn test_reachable_member_delivers_while_another_is_down() {
        let up = SimulatedHost::new();
        up.define_tag("T", TagValue::Integer(0));
        let down = SimulatedHost::new();
        down.set_reachable(false);

        // One factory per host: route by endpoint name.
        #[derive(Clone)]
        struct Routed {
            up: SimulatedHost,
            down: SimulatedHost,
        }

        #[async_trait::async_trait]
        impl SessionFactory for Routed {
            type Session = crate::simulator::SimulatedSession;

            async fn open(
                &self,
                endpoint: &Endpoint,
            ) -> Result<Self::Session, crate::core::error::CtApiError> {
                if endpoint.host == "down" {
                    self.down.open(endpoint).await
                } else {
                    self.up.open(endpoint).await
                }
            }
        }

        let cluster = ClusterConnection::spawn(
            endpoints(&["down", "up"]),
            Routed {
                up: up.clone(),
                down: down.clone(),
            },
            fast_config(),
        )
        .unwrap();
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        cluster.add_list("L");
        cluster.add_tag("L", "T");
        cluster.subscribe("L", move |batch| sink.lock().unwrap().push(batch.host.clone()));

        wait_for("up member converged", || cluster.members()[1].snapshot().tags_active.len() == 1).await;
        up.set_value("T", TagValue::Integer(7));
        wait_for("delivery", || !seen.lock().unwrap().is_empty()).await;

        assert_eq!(seen.lock().unwrap()[0], "up");
        assert!(down.open_attempts() >= 1);
        assert_eq!(down.sessions_opened(), 0);
        assert!(matches!(
            cluster.members()[0].state(),
            ConnectionState::Connecting | ConnectionState::Degraded { .. }
        ));
        cluster.stop().await;
    }

    #[tokio::test]
    async fn test_sticky_token_moves_to_standby_after_link_loss() {
        let primary = SimulatedHost::new();
        primary.define_tag("T", TagValue::Integer(0));
        let standby = SimulatedHost::new();
        standby.define_tag("T", TagValue::Integer(0));

        #[derive(Clone)]
        struct Pair {
            primary: SimulatedHost,
            standby: SimulatedHost,
        }

        #[async_trait::async_trait]
        impl SessionFactory for Pair {
            type Session = crate::simulator::SimulatedSession;

            async fn open(
                &self,
                endpoint: &Endpoint,
            ) -> Result<Self::Session, crate::core::error::CtApiError> {
                if endpoint.host == "primary" {
                    self.primary.open(endpoint).await
                } else {
                    self.standby.open(endpoint).await
                }
            }
        }

        let config = ConnectionConfig {
            token_policy: TokenPolicy::Sticky,
            ..fast_config()
        };
        let cluster = ClusterConnection::spawn(
            endpoints(&["primary", "standby"]),
            Pair {
                primary: primary.clone(),
                standby: standby.clone(),
            },
            config,
        )
        .unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        cluster.add_list("L");
        cluster.add_tag("L", "T");
        cluster.subscribe("L", move |batch| sink.lock().unwrap().push(batch.host.clone()));
        wait_for("both converged", || {
            cluster.members().iter().all(|m| m.snapshot().tags_active.len() == 1)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cluster.token().is_held());

        // Whoever grabbed the token first keeps it while its link is healthy.
        primary.set_value("T", TagValue::Integer(1));
        standby.set_value("T", TagValue::Integer(1));
        wait_for("first delivery", || !seen.lock().unwrap().is_empty()).await;
        let holder = seen.lock().unwrap()[0].clone();
        let (lost, other) = if holder == "primary" {
            (&primary, "standby")
        } else {
            (&standby, "primary")
        };

        lost.set_reachable(false);
        lost.drop_link();
        primary.set_value("T", TagValue::Integer(2));
        standby.set_value("T", TagValue::Integer(2));
        wait_for("failover delivery", || seen.lock().unwrap().iter().any(|h| h == other)).await;

        cluster.stop().await;
        assert!(!cluster.token().is_held());
    }
}
