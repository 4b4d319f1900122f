//! Connection registry, topic index and broadcast engine.
//!
//! The hub owns every live connection. Four structures move together:
//! the connection table, each connection's own topic set, the inverse
//! topic index and the per-user connection index. All four are guarded
//! by one mutex and mutated as a unit; a partial update between them
//! is the bug class this module exists to prevent.
//!
//! Fan-out never does I/O under the lock: delivery snapshots the
//! subscriber senders while locked, releases, then pushes to each
//! connection's bounded queue. A connection whose queue is closed or
//! full is evicted through the same `disconnect` path as an explicit
//! close, and the rest of the fan-out proceeds.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use tradecast_sdk::{Envelope, EventKind};
use uuid::Uuid;

/// Default per-connection outbound queue depth.
///
/// Enough buffer to ride out bursts; a consumer that falls this far
/// behind is treated as dead.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 64;

/// Sender half of a connection's outbound queue.
pub type ConnectionSender = mpsc::Sender<Envelope>;
/// Receiver half of a connection's outbound queue.
pub type ConnectionReceiver = mpsc::Receiver<Envelope>;

/// Create the outbound queue for one connection.
///
/// The transport task drains the receiver in order, so per-connection
/// delivery order is the order envelopes were broadcast.
pub fn connection_channel() -> (ConnectionSender, ConnectionReceiver) {
    mpsc::channel(DEFAULT_SEND_QUEUE_CAPACITY)
}

/// Hub policy knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Concurrent connections one user may hold before `connect`
    /// rejects.
    pub max_connections_per_user: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
        }
    }
}

/// Errors surfaced by hub registration.
#[derive(Debug, Error)]
pub enum HubError {
    /// The user already holds the maximum number of connections; the
    /// new transport should be closed with a policy-violation code.
    #[error("user {user_id} already holds {limit} connections")]
    CapacityExceeded { user_id: i64, limit: usize },
}

/// Read-only snapshot of the hub's shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub distinct_users: usize,
    pub topic_subscribers: HashMap<String, usize>,
    pub user_connections: HashMap<i64, usize>,
}

struct ConnectionEntry {
    user_id: i64,
    sender: ConnectionSender,
    topics: HashSet<String>,
    connected_at: OffsetDateTime,
    last_heartbeat: OffsetDateTime,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<Uuid, ConnectionEntry>,
    topic_index: HashMap<String, HashSet<Uuid>>,
    user_index: HashMap<i64, HashSet<Uuid>>,
}

impl HubInner {
    /// Remove `id` from all four structures. Returns the entry so the
    /// caller can drop the sender outside the lock.
    fn remove(&mut self, id: Uuid) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&id)?;
        for topic in &entry.topics {
            if let Some(subscribers) = self.topic_index.get_mut(topic) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    self.topic_index.remove(topic);
                }
            }
        }
        if let Some(owned) = self.user_index.get_mut(&entry.user_id) {
            owned.remove(&id);
            if owned.is_empty() {
                self.user_index.remove(&entry.user_id);
            }
        }
        Some(entry)
    }
}

/// The connection/subscription broadcast hub.
///
/// Explicitly constructed and passed to whatever needs it; there is no
/// global instance.
pub struct ConnectionHub {
    inner: Mutex<HubInner>,
    config: HubConfig,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            config,
        }
    }

    /// Register a new connection for `user_id`.
    ///
    /// Rejects with [`HubError::CapacityExceeded`] when the user is at
    /// the connection cap. On success the new connection, and only it,
    /// immediately receives a connection acknowledgement.
    pub async fn connect(
        &self,
        user_id: i64,
        sender: ConnectionSender,
    ) -> Result<Uuid, HubError> {
        let id = Uuid::new_v4();
        let ack_sender = {
            let mut inner = self.inner.lock().await;
            let held = inner.user_index.get(&user_id).map_or(0, HashSet::len);
            if held >= self.config.max_connections_per_user {
                warn!(
                    user_id,
                    held,
                    limit = self.config.max_connections_per_user,
                    "connection rejected, per-user limit reached"
                );
                return Err(HubError::CapacityExceeded {
                    user_id,
                    limit: self.config.max_connections_per_user,
                });
            }
            let now = OffsetDateTime::now_utc();
            inner.connections.insert(
                id,
                ConnectionEntry {
                    user_id,
                    sender: sender.clone(),
                    topics: HashSet::new(),
                    connected_at: now,
                    last_heartbeat: now,
                },
            );
            inner.user_index.entry(user_id).or_default().insert(id);
            sender
        };

        debug!(connection_id = %id, user_id, "connection registered");

        let ack = Envelope::new(
            EventKind::SystemNotification,
            json!({ "message": "connected", "connection_id": id }),
        )
        .for_user(user_id);
        if ack_sender.try_send(ack).is_err() {
            // The transport died between accept and ack.
            self.disconnect(id).await;
        }
        Ok(id)
    }

    /// Remove a connection from every structure it appears in.
    ///
    /// Idempotent: unknown ids are a no-op. Dropping the entry drops
    /// the hub's sender clone, which closes the outbound queue and
    /// lets the transport task finish.
    pub async fn disconnect(&self, id: Uuid) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.remove(id)
        };
        match removed {
            Some(entry) => {
                let uptime = OffsetDateTime::now_utc() - entry.connected_at;
                debug!(connection_id = %id, user_id = entry.user_id, ?uptime, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Subscribe a connection to a topic. Returns `false` when the
    /// connection is unknown. On success the connection receives a
    /// subscription acknowledgement.
    pub async fn subscribe(&self, id: Uuid, topic: &str) -> bool {
        let ack_sender = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.connections.get_mut(&id) else {
                return false;
            };
            entry.topics.insert(topic.to_string());
            let sender = entry.sender.clone();
            inner
                .topic_index
                .entry(topic.to_string())
                .or_default()
                .insert(id);
            sender
        };

        let ack = Envelope::new(
            EventKind::SubscriptionSuccess,
            json!({ "topic": topic }),
        );
        if ack_sender.try_send(ack).is_err() {
            self.disconnect(id).await;
        }
        true
    }

    /// Remove a topic from a connection. Returns `false` when the
    /// connection is unknown; unsubscribing a topic that was never
    /// subscribed is a no-op.
    pub async fn unsubscribe(&self, id: Uuid, topic: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.connections.get_mut(&id) else {
            return false;
        };
        entry.topics.remove(topic);
        if let Some(subscribers) = inner.topic_index.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                inner.topic_index.remove(topic);
            }
        }
        true
    }

    /// Deliver an envelope to every connection subscribed to `topic`.
    ///
    /// Returns the number of successful deliveries. A connection whose
    /// queue rejects the envelope is evicted; the rest still receive
    /// theirs.
    pub async fn broadcast_to_topic(&self, topic: &str, envelope: Envelope) -> usize {
        let targets = {
            let inner = self.inner.lock().await;
            match inner.topic_index.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter_map(|id| {
                        inner
                            .connections
                            .get(id)
                            .map(|entry| (*id, entry.sender.clone()))
                    })
                    .collect::<Vec<_>>(),
                None => return 0,
            }
        };
        self.deliver(targets, envelope).await
    }

    /// Deliver an envelope to every connection owned by `user_id`.
    /// Zero connections is not an error.
    pub async fn send_to_user(&self, user_id: i64, envelope: Envelope) -> usize {
        let targets = {
            let inner = self.inner.lock().await;
            match inner.user_index.get(&user_id) {
                Some(owned) => owned
                    .iter()
                    .filter_map(|id| {
                        inner
                            .connections
                            .get(id)
                            .map(|entry| (*id, entry.sender.clone()))
                    })
                    .collect::<Vec<_>>(),
                None => return 0,
            }
        };
        self.deliver(targets, envelope).await
    }

    /// Deliver an envelope to every live connection.
    pub async fn broadcast_to_all(&self, envelope: Envelope) -> usize {
        let targets = {
            let inner = self.inner.lock().await;
            inner
                .connections
                .iter()
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect::<Vec<_>>()
        };
        self.deliver(targets, envelope).await
    }

    /// Deliver an envelope to one connection. Returns `false` when the
    /// connection is unknown or the delivery failed (and the
    /// connection was evicted).
    pub async fn send_to_connection(&self, id: Uuid, envelope: Envelope) -> bool {
        let sender = {
            let inner = self.inner.lock().await;
            match inner.connections.get(&id) {
                Some(entry) => entry.sender.clone(),
                None => return false,
            }
        };
        if sender.try_send(envelope).is_err() {
            self.disconnect(id).await;
            return false;
        }
        true
    }

    /// Refresh a connection's liveness timestamp.
    pub async fn touch(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.connections.get_mut(&id) {
            Some(entry) => {
                entry.last_heartbeat = OffsetDateTime::now_utc();
                true
            }
            None => false,
        }
    }

    /// Evict every connection whose last heartbeat is older than
    /// `cutoff`, through the same path as an explicit disconnect.
    /// Returns the evicted ids.
    pub async fn reap_stale(&self, cutoff: OffsetDateTime) -> Vec<Uuid> {
        let stale: Vec<Uuid> = {
            let inner = self.inner.lock().await;
            inner
                .connections
                .iter()
                .filter(|(_, entry)| entry.last_heartbeat < cutoff)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &stale {
            info!(connection_id = %id, "evicting stale connection");
            self.disconnect(*id).await;
        }
        stale
    }

    /// Read-only snapshot of connection and subscription counts.
    pub async fn stats(&self) -> HubStats {
        let inner = self.inner.lock().await;
        HubStats {
            total_connections: inner.connections.len(),
            distinct_users: inner.user_index.len(),
            topic_subscribers: inner
                .topic_index
                .iter()
                .map(|(topic, subscribers)| (topic.clone(), subscribers.len()))
                .collect(),
            user_connections: inner
                .user_index
                .iter()
                .map(|(user, owned)| (*user, owned.len()))
                .collect(),
        }
    }

    /// Push `envelope` to each target outside the lock; evict the
    /// connections whose queue refused it.
    async fn deliver(&self, targets: Vec<(Uuid, ConnectionSender)>, envelope: Envelope) -> usize {
        let mut delivered = 0usize;
        let mut failed = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(id),
            }
        }
        for id in failed {
            warn!(connection_id = %id, "delivery failed, evicting connection");
            self.disconnect(id).await;
        }
        delivered
    }

    #[cfg(test)]
    /// Check the subscription-symmetry invariant: `t ∈ c.topics` iff
    /// `c ∈ index[t]`, and every index entry points at a live
    /// connection.
    async fn assert_consistent(&self) {
        let inner = self.inner.lock().await;
        for (id, entry) in &inner.connections {
            for topic in &entry.topics {
                assert!(
                    inner
                        .topic_index
                        .get(topic)
                        .is_some_and(|s| s.contains(id)),
                    "topic {topic} missing connection {id} in inverse index"
                );
            }
            assert!(
                inner
                    .user_index
                    .get(&entry.user_id)
                    .is_some_and(|s| s.contains(id)),
                "user index missing connection {id}"
            );
        }
        for (topic, subscribers) in &inner.topic_index {
            assert!(!subscribers.is_empty(), "empty index entry for {topic}");
            for id in subscribers {
                assert!(
                    inner
                        .connections
                        .get(id)
                        .is_some_and(|e| e.topics.contains(topic)),
                    "index entry {topic} -> {id} has no forward edge"
                );
            }
        }
    }

    #[cfg(test)]
    /// Backdate a connection's heartbeat; used by reaper tests.
    async fn age_heartbeat(&self, id: Uuid, by: time::Duration) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.connections.get_mut(&id) {
            entry.last_heartbeat -= by;
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(hub: &ConnectionHub, user_id: i64) -> (Uuid, ConnectionReceiver) {
        let (tx, mut rx) = connection_channel();
        let id = hub.connect(user_id, tx).await.unwrap();
        // Swallow the connection ack so tests see only their events.
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.kind, EventKind::SystemNotification);
        (id, rx)
    }

    fn envelope() -> Envelope {
        Envelope::new(EventKind::PriceUpdate, json!({ "symbol": "BTC" }))
    }

    #[tokio::test]
    async fn connect_delivers_ack_to_new_connection_only() {
        let hub = ConnectionHub::default();
        let (_a, mut rx_a) = connect(&hub, 1).await;
        let (tx, mut rx_b) = connection_channel();
        hub.connect(2, tx).await.unwrap();
        let ack = rx_b.recv().await.unwrap();
        assert_eq!(ack.kind, EventKind::SystemNotification);
        assert_eq!(ack.user_id, Some(2));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejects_connection_over_the_per_user_cap() {
        let hub = ConnectionHub::new(HubConfig {
            max_connections_per_user: 2,
        });
        let (_a, _rx_a) = connect(&hub, 1).await;
        let (b, mut rx_b) = connect(&hub, 1).await;

        let (tx, _rx) = connection_channel();
        let err = hub.connect(1, tx).await.unwrap_err();
        assert!(matches!(
            err,
            HubError::CapacityExceeded { user_id: 1, limit: 2 }
        ));

        // The user's existing connections are untouched.
        assert!(hub.send_to_connection(b, envelope()).await);
        assert_eq!(rx_b.recv().await.unwrap().kind, EventKind::PriceUpdate);

        // A different user still connects fine.
        let (tx, _rx_c) = connection_channel();
        assert!(hub.connect(2, tx).await.is_ok());
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn fan_out_reaches_exactly_the_subscribers() {
        let hub = ConnectionHub::default();
        let (a, mut rx_a) = connect(&hub, 1).await;
        let (b, mut rx_b) = connect(&hub, 2).await;
        let (c, mut rx_c) = connect(&hub, 3).await;

        assert!(hub.subscribe(a, "price:BTC").await);
        assert!(hub.subscribe(b, "price:BTC").await);
        // c subscribes to an unrelated topic.
        assert!(hub.subscribe(c, "price:ETH").await);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(rx.recv().await.unwrap().kind, EventKind::SubscriptionSuccess);
        }

        let delivered = hub.broadcast_to_topic("price:BTC", envelope()).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap().kind, EventKind::PriceUpdate);
        assert_eq!(rx_b.recv().await.unwrap().kind, EventKind::PriceUpdate);
        assert!(rx_c.try_recv().is_err());
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn broadcast_to_unknown_topic_delivers_nothing() {
        let hub = ConnectionHub::default();
        let (_a, _rx) = connect(&hub, 1).await;
        assert_eq!(hub.broadcast_to_topic("price:DOGE", envelope()).await, 0);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_restores_symmetry() {
        let hub = ConnectionHub::default();
        let (a, mut rx_a) = connect(&hub, 1).await;
        assert!(hub.subscribe(a, "alerts:user:1").await);
        rx_a.recv().await.unwrap();
        hub.assert_consistent().await;

        assert!(hub.unsubscribe(a, "alerts:user:1").await);
        hub.assert_consistent().await;
        assert_eq!(hub.broadcast_to_topic("alerts:user:1", envelope()).await, 0);

        // Second unsubscribe is a no-op, not an error.
        assert!(hub.unsubscribe(a, "alerts:user:1").await);
        // Unknown connection id is reported as such.
        assert!(!hub.unsubscribe(Uuid::new_v4(), "alerts:user:1").await);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_clears_the_index() {
        let hub = ConnectionHub::default();
        let (a, mut rx_a) = connect(&hub, 1).await;
        hub.subscribe(a, "price:BTC").await;
        rx_a.recv().await.unwrap();

        assert!(hub.disconnect(a).await);
        assert!(!hub.disconnect(a).await);
        hub.assert_consistent().await;

        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.distinct_users, 0);
        assert!(stats.topic_subscribers.is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_evicts_only_that_connection() {
        let hub = ConnectionHub::default();
        let (a, rx_a) = connect(&hub, 1).await;
        let (b, mut rx_b) = connect(&hub, 2).await;
        hub.subscribe(a, "price:BTC").await;
        hub.subscribe(b, "price:BTC").await;
        rx_b.recv().await.unwrap();

        // Kill a's transport; its queue is now closed.
        drop(rx_a);

        let delivered = hub.broadcast_to_topic("price:BTC", envelope()).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.recv().await.unwrap().kind, EventKind::PriceUpdate);

        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.topic_subscribers.get("price:BTC"), Some(&1));
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn send_to_user_hits_all_their_connections() {
        let hub = ConnectionHub::default();
        let (_a1, mut rx_1) = connect(&hub, 1).await;
        let (_a2, mut rx_2) = connect(&hub, 1).await;
        let (_b, mut rx_b) = connect(&hub, 2).await;

        let delivered = hub.send_to_user(1, envelope()).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_1.recv().await.unwrap().kind, EventKind::PriceUpdate);
        assert_eq!(rx_2.recv().await.unwrap().kind, EventKind::PriceUpdate);
        assert!(rx_b.try_recv().is_err());

        // No connections for the user is not an error.
        assert_eq!(hub.send_to_user(99, envelope()).await, 0);
    }

    #[tokio::test]
    async fn reaper_evicts_stale_connections_and_their_subscriptions() {
        let hub = ConnectionHub::default();
        let (stale, mut rx_stale) = connect(&hub, 1).await;
        let (fresh, mut rx_fresh) = connect(&hub, 2).await;
        hub.subscribe(stale, "price:BTC").await;
        hub.subscribe(fresh, "price:BTC").await;
        rx_stale.recv().await.unwrap();
        rx_fresh.recv().await.unwrap();

        hub.age_heartbeat(stale, time::Duration::seconds(301)).await;
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(300);
        let evicted = hub.reap_stale(cutoff).await;
        assert_eq!(evicted, vec![stale]);

        assert_eq!(hub.broadcast_to_topic("price:BTC", envelope()).await, 1);
        assert_eq!(rx_fresh.recv().await.unwrap().kind, EventKind::PriceUpdate);
        hub.assert_consistent().await;
    }

    #[tokio::test]
    async fn touch_refreshes_liveness() {
        let hub = ConnectionHub::default();
        let (a, _rx) = connect(&hub, 1).await;
        hub.age_heartbeat(a, time::Duration::seconds(400)).await;
        assert!(hub.touch(a).await);
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(300);
        assert!(hub.reap_stale(cutoff).await.is_empty());
        assert!(!hub.touch(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn stats_counts_topics_and_users() {
        let hub = ConnectionHub::default();
        let (a, _rx_a) = connect(&hub, 1).await;
        let (b, _rx_b) = connect(&hub, 1).await;
        let (c, _rx_c) = connect(&hub, 2).await;
        hub.subscribe(a, "price:BTC").await;
        hub.subscribe(b, "price:BTC").await;
        hub.subscribe(c, "system:all").await;

        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.distinct_users, 2);
        assert_eq!(stats.topic_subscribers.get("price:BTC"), Some(&2));
        assert_eq!(stats.topic_subscribers.get("system:all"), Some(&1));
        assert_eq!(stats.user_connections.get(&1), Some(&2));
    }
}
