//! Bus-backed lifetime manager.
//!
//! The same contract as [`LocalHubManager`](crate::hub::local::LocalHubManager),
//! fanned out across a fleet of servers through the pub/sub bus. Each server
//! holds its own connections; invocations travel as envelopes on the topic
//! scheme of [`HubTopics`], and group mutations for connections hosted
//! elsewhere run a correlation-id'd request/ack round over the control
//! topics.
//!
//! Locking discipline: a connection's group set is always locked before any
//! group bucket, and bucket subscribe/unsubscribe transitions happen under
//! the bucket lock so the 0→1 and 1→0 edges are exact. Completing an ack
//! never holds a manager lock.

use crate::bus::{Bus, BusError, MessageHandler};
use crate::core::config::HubConfig;
use crate::core::error::{require_non_empty, HubError};
use crate::hub::connection::{deliver, ConnectionRegistry, HubConnection};
use crate::hub::manager::HubLifetimeManager;
use crate::messaging::acks::{AckOutcome, AckTracker};
use crate::messaging::codec::{ArgValue, WireCodec};
use crate::messaging::protocol::{
    ControlMessage, ExcludingInvocationMessage, GroupAction, InvocationIdSource, InvocationMessage,
};
use crate::messaging::topics::{normalize_group, HubTopics};
use crate::ops::metrics::{HubMetrics, MetricsSnapshot};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Distributed hub lifetime manager. One instance per hub, held for the
/// process lifetime; cheap to clone.
#[derive(Clone)]
pub struct DistributedHubManager {
    inner: Arc<Inner>,
}

struct Inner {
    /// Back-reference handed to bus handlers so they never keep the manager
    /// alive on their own.
    self_weak: Weak<Inner>,
    bus: Arc<dyn Bus>,
    topics: HubTopics,
    server_id: String,
    connections: ConnectionRegistry,
    /// Per-connection state, created at connect and drained at disconnect.
    state: DashMap<String, Arc<ConnectionState>>,
    /// Normalized group name -> bucket of local members.
    buckets: DashMap<String, Arc<GroupBucket>>,
    /// User topic -> number of local connections sharing it.
    user_subscriptions: Mutex<HashMap<String, usize>>,
    acks: AckTracker,
    invocation_ids: InvocationIdSource,
    metrics: Arc<HubMetrics>,
}

struct ConnectionState {
    connection: Arc<dyn HubConnection>,
    /// Normalized group names this connection belongs to. Always locked
    /// before any bucket lock.
    groups: Mutex<HashSet<String>>,
}

struct GroupBucket {
    topic: String,
    members: Mutex<BucketMembers>,
}

#[derive(Default)]
struct BucketMembers {
    connections: HashMap<String, Arc<dyn HubConnection>>,
    /// Set when the bucket emptied and was pruned from the map; joins that
    /// raced with the prune retry against a fresh bucket.
    closed: bool,
}

/// Which inbound pipeline a subscription feeds.
#[derive(Clone)]
enum Route {
    Broadcast,
    Connection(String),
    User(String),
    Group(String),
    Control,
    ServerInbox,
}

fn route_handler(weak: Weak<Inner>, route: Route) -> MessageHandler {
    Arc::new(move |topic, payload| {
        let weak = weak.clone();
        let route = route.clone();
        Box::pin(async move {
            let Some(inner) = weak.upgrade() else { return };
            inner.metrics.record_receive();
            let outcome = match &route {
                Route::Broadcast => inner.apply_broadcast(&payload).await,
                Route::Connection(id) => inner.apply_connection(id, &payload).await,
                Route::User(user_id) => inner.apply_user(user_id, &payload).await,
                Route::Group(key) => inner.apply_group(key, &payload).await,
                Route::Control => inner.apply_control(&payload).await,
                Route::ServerInbox => inner.apply_ack(&payload).await,
            };
            if let Err(err) = outcome {
                inner.metrics.record_handler_failure();
                tracing::warn!(%topic, error = %err, "inbound bus message failed");
            }
        })
    })
}

impl DistributedHubManager {
    /// Validate the configuration, establish the server-wide subscriptions
    /// (broadcast, broadcast-with-exclusions, group control, own ack inbox),
    /// and hand back the running manager.
    pub async fn new(bus: Arc<dyn Bus>, config: HubConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid hub configuration")?;
        let server_id = config
            .server_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let inner = Arc::new_cyclic(|self_weak| Inner {
            self_weak: self_weak.clone(),
            bus,
            topics: HubTopics::new(&config.hub_name),
            server_id,
            connections: ConnectionRegistry::new(),
            state: DashMap::new(),
            buckets: DashMap::new(),
            user_subscriptions: Mutex::new(HashMap::new()),
            acks: AckTracker::new(config.ack_timeout()),
            invocation_ids: InvocationIdSource::new(),
            metrics: Arc::new(HubMetrics::new()),
        });

        let startup = [
            (inner.topics.broadcast(), Route::Broadcast),
            (inner.topics.broadcast_except(), Route::Broadcast),
            (inner.topics.group_control(), Route::Control),
            (inner.topics.server_inbox(&inner.server_id), Route::ServerInbox),
        ];
        for (topic, route) in startup {
            tracing::debug!(%topic, "subscribing");
            inner
                .bus
                .subscribe(&topic, route_handler(inner.self_weak.clone(), route))
                .await
                .with_context(|| format!("failed to subscribe {topic}"))?;
        }
        tracing::info!(
            server_id = %inner.server_id,
            hub = %config.hub_name,
            "hub lifetime manager started"
        );
        Ok(Self { inner })
    }

    pub fn server_id(&self) -> &str {
        &self.inner.server_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Release every subscription and complete all outstanding ack waiters.
    pub async fn shutdown(&self) {
        if let Err(err) = self.inner.bus.unsubscribe_all().await {
            tracing::warn!(error = %err, "unsubscribe-all on shutdown failed");
        }
        self.inner.acks.dispose();
    }
}

impl Inner {
    fn next_envelope(
        &self,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> ExcludingInvocationMessage {
        let message = InvocationMessage::non_blocking(self.invocation_ids.next_id(), method, args);
        ExcludingInvocationMessage::new(message, excluded_ids.iter().cloned())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), HubError> {
        tracing::debug!(%topic, "publishing");
        self.bus.publish(topic, payload).await?;
        self.metrics.record_publish();
        Ok(())
    }

    async fn publish_invocation(
        &self,
        topic: &str,
        envelope: &ExcludingInvocationMessage,
    ) -> Result<(), HubError> {
        let payload = WireCodec::encode_invocation(envelope)?;
        self.publish(topic, payload).await
    }

    // --- inbound pipelines -------------------------------------------------

    async fn apply_broadcast(&self, payload: &[u8]) -> anyhow::Result<()> {
        let envelope = WireCodec::decode_invocation(payload)?;
        for connection in self.connections.snapshot() {
            if envelope.excludes(connection.id()) {
                continue;
            }
            deliver(&connection, envelope.message.clone(), &self.metrics).await;
        }
        Ok(())
    }

    async fn apply_connection(&self, connection_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        let envelope = WireCodec::decode_invocation(payload)?;
        if let Some(connection) = self.connections.lookup(connection_id) {
            deliver(&connection, envelope.message, &self.metrics).await;
        }
        Ok(())
    }

    async fn apply_user(&self, user_id: &str, payload: &[u8]) -> anyhow::Result<()> {
        let envelope = WireCodec::decode_invocation(payload)?;
        for connection in self.connections.snapshot() {
            if connection.user_id() == Some(user_id) {
                deliver(&connection, envelope.message.clone(), &self.metrics).await;
            }
        }
        Ok(())
    }

    async fn apply_group(&self, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let envelope = WireCodec::decode_invocation(payload)?;
        let Some(bucket) = self.buckets.get(key).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };
        let members: Vec<Arc<dyn HubConnection>> = {
            let guard = bucket.members.lock().await;
            guard.connections.values().cloned().collect()
        };
        for connection in members {
            if envelope.excludes(connection.id()) {
                continue;
            }
            deliver(&connection, envelope.message.clone(), &self.metrics).await;
        }
        Ok(())
    }

    async fn apply_control(&self, payload: &[u8]) -> anyhow::Result<()> {
        let control = WireCodec::decode_control(payload)?;
        // Exactly one server resolves the connection locally; everyone else
        // stays quiet and the originator's wait expires on its own.
        let Some(state) = self
            .state
            .get(&control.connection_id)
            .map(|e| Arc::clone(e.value()))
        else {
            return Ok(());
        };
        match control.action {
            GroupAction::Add => {
                let connection = Arc::clone(&state.connection);
                self.add_group_core(&connection, &state, &control.group_name)
                    .await?;
            }
            GroupAction::Remove => {
                self.remove_group_core(&control.connection_id, &state, &control.group_name)
                    .await;
            }
            // Acks belong on a server inbox, not the shared control topic.
            GroupAction::Ack => return Ok(()),
        }
        let ack = ControlMessage::ack(control.correlation_id, self.server_id.as_str());
        let payload = WireCodec::encode_control(&ack)?;
        self.publish(&self.topics.server_inbox(&control.origin_server), payload)
            .await?;
        Ok(())
    }

    async fn apply_ack(&self, payload: &[u8]) -> anyhow::Result<()> {
        let control = WireCodec::decode_control(payload)?;
        if control.action == GroupAction::Ack {
            self.acks.trigger_ack(control.correlation_id);
        }
        Ok(())
    }

    // --- group membership --------------------------------------------------

    async fn add_group_core(
        &self,
        connection: &Arc<dyn HubConnection>,
        state: &ConnectionState,
        group_name: &str,
    ) -> Result<(), HubError> {
        let key = normalize_group(group_name);
        let mut groups = state.groups.lock().await;
        if groups.contains(&key) {
            return Ok(());
        }
        self.join_bucket(&key, connection).await?;
        groups.insert(key);
        Ok(())
    }

    async fn remove_group_core(
        &self,
        connection_id: &str,
        state: &ConnectionState,
        group_name: &str,
    ) {
        let key = normalize_group(group_name);
        let mut groups = state.groups.lock().await;
        if !groups.remove(&key) {
            return;
        }
        self.leave_bucket(&key, connection_id).await;
    }

    async fn join_bucket(
        &self,
        key: &str,
        connection: &Arc<dyn HubConnection>,
    ) -> Result<(), HubError> {
        loop {
            let bucket = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(GroupBucket {
                        topic: self.topics.group(key),
                        members: Mutex::new(BucketMembers::default()),
                    })
                })
                .clone();
            let mut members = bucket.members.lock().await;
            if members.closed {
                // Lost a race against the pruner; fetch a fresh bucket.
                continue;
            }
            let first_member = members.connections.is_empty();
            members
                .connections
                .insert(connection.id().to_string(), Arc::clone(connection));
            if first_member {
                tracing::debug!(topic = %bucket.topic, "subscribing");
                let handler =
                    route_handler(self.self_weak.clone(), Route::Group(key.to_string()));
                if let Err(err) = self.bus.subscribe(&bucket.topic, handler).await
                {
                    members.connections.remove(connection.id());
                    return Err(HubError::Bus(err));
                }
            }
            return Ok(());
        }
    }

    async fn leave_bucket(&self, key: &str, connection_id: &str) {
        let Some(bucket) = self.buckets.get(key).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let mut members = bucket.members.lock().await;
        members.connections.remove(connection_id);
        if members.connections.is_empty() && !members.closed {
            members.closed = true;
            tracing::debug!(topic = %bucket.topic, "unsubscribing");
            if let Err(err) = self.bus.unsubscribe(&bucket.topic).await {
                tracing::warn!(topic = %bucket.topic, error = %err, "group topic unsubscribe failed");
            }
            self.buckets.remove_if(key, |_, b| Arc::ptr_eq(b, &bucket));
        }
    }

    async fn send_group_command(
        &self,
        action: GroupAction,
        connection_id: &str,
        group_name: &str,
    ) -> Result<(), HubError> {
        let ack = self.acks.create_ack();
        let control = match action {
            GroupAction::Add => ControlMessage::add(
                ack.correlation_id(),
                connection_id,
                group_name,
                self.server_id.as_str(),
            ),
            _ => ControlMessage::remove(
                ack.correlation_id(),
                connection_id,
                group_name,
                self.server_id.as_str(),
            ),
        };
        let payload = WireCodec::encode_control(&control)?;
        self.publish(&self.topics.group_control(), payload).await?;
        if self.acks.wait(ack).await == AckOutcome::TimedOut {
            // Unknown connection and network partition look the same from
            // here; the operation still completes.
            self.metrics.record_ack_timeout();
            tracing::debug!(
                connection_id,
                group = group_name,
                "group mutation ack timed out"
            );
        }
        Ok(())
    }

    // --- per-connection subscriptions --------------------------------------

    async fn subscribe_user(&self, user_id: &str) -> Result<(), BusError> {
        let topic = self.topics.user(user_id);
        let mut counts = self.user_subscriptions.lock().await;
        let count = counts.entry(topic.clone()).or_insert(0);
        if *count == 0 {
            tracing::debug!(%topic, "subscribing");
            let handler =
                route_handler(self.self_weak.clone(), Route::User(user_id.to_string()));
            self.bus.subscribe(&topic, handler).await?;
        }
        *count += 1;
        Ok(())
    }

    async fn unsubscribe_user(&self, user_id: &str) {
        let topic = self.topics.user(user_id);
        let mut counts = self.user_subscriptions.lock().await;
        if let Some(count) = counts.get_mut(&topic) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&topic);
                tracing::debug!(%topic, "unsubscribing");
                if let Err(err) = self.bus.unsubscribe(&topic).await {
                    tracing::warn!(%topic, error = %err, "user topic unsubscribe failed");
                }
            }
        }
    }

    fn shared_user_id(connection: &Arc<dyn HubConnection>) -> Option<&str> {
        connection.user_id().filter(|user| !user.is_empty())
    }
}

#[async_trait]
impl HubLifetimeManager for DistributedHubManager {
    async fn on_connected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError> {
        let inner = &self.inner;
        let id = connection.id().to_string();
        let state = Arc::new(ConnectionState {
            connection: Arc::clone(&connection),
            groups: Mutex::new(HashSet::new()),
        });
        inner.connections.add(Arc::clone(&connection));
        inner.state.insert(id.clone(), state);

        let topic = inner.topics.connection(&id);
        tracing::debug!(%topic, "subscribing");
        let handler = route_handler(inner.self_weak.clone(), Route::Connection(id.clone()));
        if let Err(err) = inner.bus.subscribe(&topic, handler).await {
            inner.connections.remove(&id);
            inner.state.remove(&id);
            return Err(HubError::Bus(err));
        }

        if let Some(user) = Inner::shared_user_id(&connection) {
            if let Err(err) = inner.subscribe_user(user).await {
                if let Err(cleanup) = inner.bus.unsubscribe(&topic).await {
                    tracing::warn!(%topic, error = %cleanup, "connection topic cleanup failed");
                }
                inner.connections.remove(&id);
                inner.state.remove(&id);
                return Err(HubError::Bus(err));
            }
        }
        Ok(())
    }

    async fn on_disconnected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError> {
        let inner = &self.inner;
        let id = connection.id();
        inner.connections.remove(id);

        // Per-connection subscriptions are released even when an individual
        // teardown fails.
        let topic = inner.topics.connection(id);
        tracing::debug!(%topic, "unsubscribing");
        if let Err(err) = inner.bus.unsubscribe(&topic).await {
            tracing::warn!(%topic, error = %err, "connection topic unsubscribe failed");
        }
        if let Some(user) = Inner::shared_user_id(&connection) {
            inner.unsubscribe_user(user).await;
        }

        // Local bucket cleanup only; a departing connection never triggers
        // cross-server control traffic.
        if let Some((_, state)) = inner.state.remove(id) {
            let mut groups = state.groups.lock().await;
            let names: Vec<String> = groups.drain().collect();
            for key in &names {
                inner.leave_bucket(key, id).await;
            }
        }
        Ok(())
    }

    async fn invoke_all(&self, method: &str, args: Vec<ArgValue>) -> Result<(), HubError> {
        let inner = &self.inner;
        let envelope = inner.next_envelope(method, args, &[]);
        inner
            .publish_invocation(&inner.topics.broadcast(), &envelope)
            .await
    }

    async fn invoke_all_except(
        &self,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError> {
        let inner = &self.inner;
        let envelope = inner.next_envelope(method, args, excluded_ids);
        inner
            .publish_invocation(&inner.topics.broadcast_except(), &envelope)
            .await
    }

    async fn invoke_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        let inner = &self.inner;
        // Short circuit: a locally hosted target skips the bus round trip
        // and both envelope codings.
        if let Some(connection) = inner.connections.lookup(connection_id) {
            let message =
                InvocationMessage::non_blocking(inner.invocation_ids.next_id(), method, args);
            deliver(&connection, message, &inner.metrics).await;
            return Ok(());
        }
        let envelope = inner.next_envelope(method, args, &[]);
        inner
            .publish_invocation(&inner.topics.connection(connection_id), &envelope)
            .await
    }

    async fn invoke_group(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(group_name, "group name")?;
        let inner = &self.inner;
        let envelope = inner.next_envelope(method, args, &[]);
        inner
            .publish_invocation(&inner.topics.group(group_name), &envelope)
            .await
    }

    async fn invoke_group_except(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError> {
        require_non_empty(group_name, "group name")?;
        let inner = &self.inner;
        let envelope = inner.next_envelope(method, args, excluded_ids);
        inner
            .publish_invocation(&inner.topics.group(group_name), &envelope)
            .await
    }

    async fn invoke_user(
        &self,
        user_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(user_id, "user id")?;
        let inner = &self.inner;
        let envelope = inner.next_envelope(method, args, &[]);
        inner
            .publish_invocation(&inner.topics.user(user_id), &envelope)
            .await
    }

    async fn add_to_group(&self, connection_id: &str, group_name: &str) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        require_non_empty(group_name, "group name")?;
        let inner = &self.inner;
        if let Some(state) = inner.state.get(connection_id).map(|e| Arc::clone(e.value())) {
            let connection = Arc::clone(&state.connection);
            return inner.add_group_core(&connection, &state, group_name).await;
        }
        inner
            .send_group_command(GroupAction::Add, connection_id, group_name)
            .await
    }

    async fn remove_from_group(
        &self,
        connection_id: &str,
        group_name: &str,
    ) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        require_non_empty(group_name, "group name")?;
        let inner = &self.inner;
        if let Some(state) = inner.state.get(connection_id).map(|e| Arc::clone(e.value())) {
            inner
                .remove_group_core(connection_id, &state, group_name)
                .await;
            return Ok(());
        }
        inner
            .send_group_command(GroupAction::Remove, connection_id, group_name)
            .await
    }
}
