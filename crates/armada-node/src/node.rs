//! The running node: cluster runtime wiring and lifecycle
//!
//! A [`Node`] owns the component registry, the network endpoints and the
//! module provider, installs the built-in cluster packet listeners on
//! both endpoints, dials its configured peers with a hello round trip,
//! and keeps the membership view fed with periodic snapshot broadcasts.
//! Everything it installs is registered under one owner token, separate
//! from any module's registrations.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use armada_api::{
    model::{
        ClusterNode, DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_NODE_PORT, DEFAULT_RPC_TIMEOUT_MILLIS,
        DEFAULT_SNAPSHOT_INTERVAL_MILLIS, HostAndPort, NodeInfoSnapshot, NodeInfoSnapshotBuilder,
        OwnerToken, SNAPSHOT_MODULES_KEY, SNAPSHOT_VERSION_KEY,
    },
    packet::{
        CHANNEL_CLUSTER_DATA_SYNC, CHANNEL_CLUSTER_HELLO, CHANNEL_CLUSTER_SNAPSHOT, CHANNEL_RPC,
        NodeHello, NodeSnapshotUpdate, Packet, SyncEntry,
    },
    rpc::RpcValue,
};
use armada_auth::{
    model::{AuthResult, User},
    service::AuthService,
};
use armada_common::NODE_VERSION_KEY;
use armada_core::{
    ComponentRegistry, NetworkChannel, NetworkClient, NetworkServer, NodeRegistry, RpcFactory,
    cluster::{event::ChannelCloseEvent, sync::DataSyncHandler},
    command::{CommandHandler, CommandInfo},
    http::AuthKind,
    network::registry::{PacketDisposition, PacketListener, PacketListenerRegistry},
    rpc::handler::{RpcCallGuard, RpcDispatchListener, RpcHandler},
};
use armada_module::ModuleProvider;

use crate::module_handler::NodeModuleHandler;

/// Permission guarding the remote cluster-management RPC target
const CLUSTER_MANAGEMENT_PERMISSION: &str = "cluster.management";

#[derive(Clone, Debug)]
pub struct NodeOptions {
    pub node_id: String,
    pub cluster_listener: HostAndPort,
    pub peers: Vec<HostAndPort>,
    pub rpc_timeout_millis: u64,
    pub connect_timeout_millis: u64,
    pub snapshot_interval_millis: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            node_id: "Node-1".to_string(),
            cluster_listener: HostAndPort::new("0.0.0.0", DEFAULT_NODE_PORT),
            peers: Vec::new(),
            rpc_timeout_millis: DEFAULT_RPC_TIMEOUT_MILLIS,
            connect_timeout_millis: DEFAULT_CONNECT_TIMEOUT_MILLIS,
            snapshot_interval_millis: DEFAULT_SNAPSHOT_INTERVAL_MILLIS,
        }
    }
}

pub struct Node {
    options: NodeOptions,
    components: Arc<ComponentRegistry>,
    auth_service: Arc<AuthService>,
    module_provider: Arc<ModuleProvider>,
    rpc_factory: RpcFactory,
    owner: OwnerToken,
    startup_millis: i64,
    client: Arc<NetworkClient>,
    server: Arc<RwLock<Option<Arc<NetworkServer>>>>,
    rpc_listener: Arc<RpcDispatchListener>,
    /// Channel id to node id, for mapping channel loss to a member
    node_channels: Arc<DashMap<Uuid, String>>,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(options: NodeOptions, auth_service: Arc<AuthService>) -> anyhow::Result<Arc<Self>> {
        let startup_millis = chrono::Utc::now().timestamp_millis();

        let mut local = ClusterNode::new(&options.node_id, vec![options.cluster_listener.clone()]);
        local
            .properties
            .insert(NODE_VERSION_KEY.to_string(), Value::from(env!("CARGO_PKG_VERSION")));

        let components = Arc::new(ComponentRegistry::new(
            local,
            build_snapshot(startup_millis, 0),
        ));
        let module_provider = Arc::new(ModuleProvider::new(components.clone()));
        let client = Arc::new(NetworkClient::new(
            components.event_bus.clone(),
            Duration::from_millis(options.connect_timeout_millis),
        ));
        let server: Arc<RwLock<Option<Arc<NetworkServer>>>> = Arc::new(RwLock::new(None));

        module_provider.set_handler(Arc::new(NodeModuleHandler::new(
            components.clone(),
            client.clone(),
            server.clone(),
        )));

        let rpc_factory = RpcFactory::new(
            components.data_mapper_registry.clone(),
            Duration::from_millis(options.rpc_timeout_millis),
        );
        let rpc_listener = Arc::new(
            RpcDispatchListener::new(
                components.rpc_handler_registry.clone(),
                components.data_mapper_registry.clone(),
            )
            .with_guard(Arc::new(NodeRpcGuard {
                auth_service: auth_service.clone(),
            })),
        );

        let node = Arc::new(Self {
            options,
            components,
            auth_service,
            module_provider,
            rpc_factory,
            owner: OwnerToken::random(),
            startup_millis,
            client,
            server,
            rpc_listener,
            node_channels: Arc::new(DashMap::new()),
            snapshot_task: Mutex::new(None),
        });

        node.register_mapper_bindings();
        node.register_security_rules()
            .context("failed to register built-in security rules")?;
        node.register_commands();
        node.register_sync_handlers();
        node.register_rpc_handlers();

        Ok(node)
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }

    pub fn auth_service(&self) -> &Arc<AuthService> {
        &self.auth_service
    }

    pub fn module_provider(&self) -> &Arc<ModuleProvider> {
        &self.module_provider
    }

    pub fn rpc_factory(&self) -> &RpcFactory {
        &self.rpc_factory
    }

    pub fn network_client(&self) -> &Arc<NetworkClient> {
        &self.client
    }

    /// The cluster endpoint, present once the node has started
    pub fn network_server(&self) -> Option<Arc<NetworkServer>> {
        self.server
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().cloned())
    }

    /// Bind the cluster listener, install the built-in packet listeners
    /// on both endpoints, dial the configured peers and start the
    /// snapshot heartbeat.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let server = Arc::new(
            NetworkServer::bind(
                &self.options.cluster_listener,
                self.components.event_bus.clone(),
            )
            .await?,
        );

        self.install_cluster_listeners(server.packet_registry());
        self.install_cluster_listeners(self.client.packet_registry());

        if let Ok(mut slot) = self.server.write() {
            *slot = Some(server.clone());
        }

        self.watch_channel_closures();

        for peer in &self.options.peers {
            // A dead peer is not fatal; it can still dial us later
            if let Err(e) = self.join_peer(peer).await {
                warn!("failed to join cluster peer {}: {:#}", peer, e);
            }
        }

        self.spawn_snapshot_task();

        info!(
            "node '{}' started, cluster listener on {}",
            self.options.node_id,
            server.local_address()
        );
        Ok(())
    }

    /// Stop modules, the snapshot heartbeat and both network endpoints.
    pub async fn stop(&self) {
        info!("node '{}' shutting down", self.options.node_id);

        self.module_provider.stop_all().await;

        if let Ok(mut slot) = self.snapshot_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }

        if let Some(server) = self.network_server() {
            server.close();
        }
        self.client.close();
    }

    fn register_mapper_bindings(&self) {
        let mappers = &self.components.data_mapper_registry;
        mappers.register_standard_bindings(self.owner);
        mappers.register_binding::<ClusterNode>(self.owner, "clusterNode");
        mappers.register_binding::<NodeInfoSnapshot>(self.owner, "nodeInfoSnapshot");
    }

    fn register_security_rules(&self) -> anyhow::Result<()> {
        let security = &self.components.security_registry;
        let owner = self.owner;

        // Login accepts Basic credentials or a JSON body; the rule is
        // optional so body-credential callers reach the handler.
        security.add_rule(
            owner,
            Some("POST"),
            "/api/v1/auth/login",
            AuthKind::Basic { optional: true },
            None,
        )?;
        security.add_rule(
            owner,
            Some("GET"),
            "/api/v1/auth/me",
            AuthKind::Bearer { optional: false },
            None,
        )?;
        security.add_rule(
            owner,
            Some("POST"),
            "/api/v1/cluster/refresh",
            AuthKind::Bearer { optional: false },
            Some("cluster.refresh"),
        )?;
        security.add_rule(
            owner,
            None,
            "/api/v1/cluster/*",
            AuthKind::Bearer { optional: false },
            None,
        )?;
        security.add_rule(
            owner,
            Some("POST"),
            "/api/v1/modules/{name}/stop",
            AuthKind::Bearer { optional: false },
            Some("modules.lifecycle"),
        )?;
        security.add_rule(
            owner,
            Some("POST"),
            "/api/v1/modules/{name}/unload",
            AuthKind::Bearer { optional: false },
            Some("modules.lifecycle"),
        )?;
        security.add_rule(
            owner,
            None,
            "/api/v1/modules/*",
            AuthKind::Bearer { optional: false },
            None,
        )?;

        Ok(())
    }

    fn register_commands(&self) {
        let provider = &self.components.command_provider;

        provider.register(
            self.owner,
            CommandInfo::new("cluster", "Show cluster membership and the current head").alias("nodes"),
            Arc::new(ClusterCommand {
                registry: self.components.node_registry.clone(),
            }),
        );
        provider.register(
            self.owner,
            CommandInfo::new("modules", "List loaded modules and their states"),
            Arc::new(ModulesCommand {
                provider: self.module_provider.clone(),
            }),
        );
    }

    fn register_sync_handlers(&self) {
        self.components.data_sync_registry.register_handler(
            self.owner,
            Arc::new(UserSyncHandler {
                users: self.auth_service.users().clone(),
            }),
        );
    }

    fn register_rpc_handlers(&self) {
        self.components
            .rpc_handler_registry
            .register_handler(Arc::new(ClusterManagementHandler {
                registry: self.components.node_registry.clone(),
            }));
    }

    fn install_cluster_listeners(&self, registry: &Arc<PacketListenerRegistry>) {
        registry.add_listener(
            self.owner,
            CHANNEL_CLUSTER_HELLO,
            Arc::new(ClusterHelloListener {
                components: self.components.clone(),
                node_channels: self.node_channels.clone(),
            }),
        );
        registry.add_listener(
            self.owner,
            CHANNEL_CLUSTER_SNAPSHOT,
            Arc::new(SnapshotUpdateListener {
                components: self.components.clone(),
            }),
        );
        registry.add_listener(
            self.owner,
            CHANNEL_CLUSTER_DATA_SYNC,
            Arc::new(DataSyncListener {
                components: self.components.clone(),
            }),
        );
        registry.add_listener(self.owner, CHANNEL_RPC, self.rpc_listener.clone());
    }

    /// Dial one peer and exchange hellos. The accepting side follows up
    /// with its shared-state documents, so the joiner never pushes its
    /// own, possibly stale, state into an established cluster.
    async fn join_peer(&self, peer: &HostAndPort) -> anyhow::Result<()> {
        let channel = self.client.connect(peer).await?;

        let local = self.components.node_registry.local_node();
        let hello = NodeHello {
            node: local.info(),
            snapshot: local.snapshot().unwrap_or_default(),
        };
        let response = channel
            .query(
                Packet::json(CHANNEL_CLUSTER_HELLO, &hello)?,
                Duration::from_millis(self.options.rpc_timeout_millis),
            )
            .await
            .with_context(|| format!("hello exchange with {} failed", peer))?;

        let peer_hello: NodeHello = response.body_as()?;
        let node_id = peer_hello.node.unique_id.clone();

        let registry = &self.components.node_registry;
        registry.register_node(peer_hello.node);
        registry.update_snapshot(&node_id, peer_hello.snapshot);
        self.node_channels.insert(channel.id(), node_id.clone());
        info!(node_id = %node_id, remote = %peer, "joined cluster peer");
        Ok(())
    }

    /// A lost channel to a member makes that member unavailable until it
    /// reports in again.
    fn watch_channel_closures(&self) {
        let node_channels = self.node_channels.clone();
        let registry = self.components.node_registry.clone();

        self.components
            .event_bus
            .register_listener::<ChannelCloseEvent, _>(self.owner, move |event| {
                if let Some((_, node_id)) = node_channels.remove(&event.channel_id) {
                    warn!(node_id = %node_id, "lost channel to node, marking unavailable");
                    registry.mark_available(&node_id, false);
                }
            });
    }

    /// Refresh the local snapshot on an interval and broadcast it over
    /// every open channel, in both directions.
    fn spawn_snapshot_task(&self) {
        let components = self.components.clone();
        let module_provider = self.module_provider.clone();
        let client = self.client.clone();
        let server = self.server.clone();
        let node_id = self.options.node_id.clone();
        let startup_millis = self.startup_millis;
        let interval_millis = self.options.snapshot_interval_millis;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_millis));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let snapshot = build_snapshot(startup_millis, module_provider.module_count());
                components.node_registry.update_snapshot(&node_id, snapshot.clone());

                let update = NodeSnapshotUpdate {
                    node_id: node_id.clone(),
                    snapshot,
                };
                let packet = match Packet::json(CHANNEL_CLUSTER_SNAPSHOT, &update) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("failed to encode snapshot update: {}", e);
                        continue;
                    }
                };

                let server_handle = server.read().ok().and_then(|slot| slot.as_ref().cloned());
                if let Some(server_handle) = server_handle {
                    server_handle.broadcast(&packet).await;
                }
                for channel in client.channels() {
                    if channel.send(packet.clone()).await.is_err() {
                        debug!(channel_id = %channel.id(), "skipping snapshot to closed channel");
                    }
                }
            }
        });

        if let Ok(mut slot) = self.snapshot_task.lock() {
            *slot = Some(task);
        }
    }
}

fn build_snapshot(startup_millis: i64, module_count: usize) -> NodeInfoSnapshot {
    NodeInfoSnapshotBuilder::new(startup_millis)
        .property(SNAPSHOT_VERSION_KEY, Value::from(env!("CARGO_PKG_VERSION")))
        .property(SNAPSHOT_MODULES_KEY, Value::from(module_count as i64))
        .build()
}

/// Send every shared-state document to one channel.
async fn push_sync_entries(components: &Arc<ComponentRegistry>, channel: &Arc<NetworkChannel>) {
    for entry in components.data_sync_registry.collect_all() {
        let packet = match Packet::json(CHANNEL_CLUSTER_DATA_SYNC, &entry) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(entry = %entry.name, "failed to encode sync entry: {}", e);
                continue;
            }
        };
        if let Err(e) = channel.send(packet).await {
            warn!(entry = %entry.name, "failed to push sync entry: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in packet listeners
// ---------------------------------------------------------------------------

/// Accepting side of the hello handshake
struct ClusterHelloListener {
    components: Arc<ComponentRegistry>,
    node_channels: Arc<DashMap<Uuid, String>>,
}

#[async_trait]
impl PacketListener for ClusterHelloListener {
    async fn handle(
        &self,
        channel: &Arc<NetworkChannel>,
        packet: &Packet,
    ) -> anyhow::Result<PacketDisposition> {
        let hello: NodeHello = packet.body_as()?;
        let node_id = hello.node.unique_id.clone();
        info!(node_id = %node_id, remote = %channel.remote_address(), "received cluster hello");

        let registry = &self.components.node_registry;
        registry.register_node(hello.node);
        registry.update_snapshot(&node_id, hello.snapshot);
        self.node_channels.insert(channel.id(), node_id);

        let local = registry.local_node();
        let reply = NodeHello {
            node: local.info(),
            snapshot: local.snapshot().unwrap_or_default(),
        };
        channel.send(Packet::json_response(packet, &reply)?).await?;

        push_sync_entries(&self.components, channel).await;
        Ok(PacketDisposition::Consume)
    }
}

struct SnapshotUpdateListener {
    components: Arc<ComponentRegistry>,
}

#[async_trait]
impl PacketListener for SnapshotUpdateListener {
    async fn handle(
        &self,
        _channel: &Arc<NetworkChannel>,
        packet: &Packet,
    ) -> anyhow::Result<PacketDisposition> {
        let update: NodeSnapshotUpdate = packet.body_as()?;
        if !self
            .components
            .node_registry
            .update_snapshot(&update.node_id, update.snapshot)
        {
            debug!(node_id = %update.node_id, "snapshot for unknown node discarded");
        }
        Ok(PacketDisposition::Consume)
    }
}

struct DataSyncListener {
    components: Arc<ComponentRegistry>,
}

#[async_trait]
impl PacketListener for DataSyncListener {
    async fn handle(
        &self,
        _channel: &Arc<NetworkChannel>,
        packet: &Packet,
    ) -> anyhow::Result<PacketDisposition> {
        let entry: SyncEntry = packet.body_as()?;
        self.components.data_sync_registry.handle_incoming(entry);
        Ok(PacketDisposition::Consume)
    }
}

// ---------------------------------------------------------------------------
// RPC guard and built-in RPC target
// ---------------------------------------------------------------------------

/// Validates access tokens on permission-guarded RPC targets against the
/// same user store as the HTTP middleware.
struct NodeRpcGuard {
    auth_service: Arc<AuthService>,
}

impl RpcCallGuard for NodeRpcGuard {
    fn authorize(&self, access_token: Option<&str>, required_permission: &str) -> Result<(), String> {
        let Some(token) = access_token else {
            return Err("no access token provided".to_string());
        };

        let user = match self.auth_service.authenticate_bearer(token) {
            AuthResult::Succeeded(user) => user,
            AuthResult::Failed { reason } => return Err(reason),
        };

        let check = self.auth_service.authorize(&user, required_permission);
        match check.message {
            None if check.passed => Ok(()),
            Some(message) => Err(message),
            None => Err("permission check failed".to_string()),
        }
    }
}

/// Remote management surface mirroring the cluster REST endpoints
struct ClusterManagementHandler {
    registry: Arc<NodeRegistry>,
}

#[async_trait]
impl RpcHandler for ClusterManagementHandler {
    fn target(&self) -> &str {
        "clusterManagement"
    }

    fn required_permission(&self) -> Option<&str> {
        Some(CLUSTER_MANAGEMENT_PERMISSION)
    }

    async fn invoke(
        &self,
        method: &str,
        _arguments: &[RpcValue],
    ) -> anyhow::Result<Option<RpcValue>> {
        match method {
            "headNodeId" => {
                let head = self.registry.head_node();
                Ok(Some(RpcValue::new("string", Value::from(head.unique_id()))))
            }
            "nodeIds" => {
                let mut ids: Vec<String> = self
                    .registry
                    .node_servers()
                    .iter()
                    .map(|server| server.unique_id().to_string())
                    .collect();
                ids.sort();
                Ok(Some(RpcValue::new("json", serde_json::to_value(ids)?)))
            }
            "refreshHeadNode" => {
                let head = self.registry.refresh_head_node();
                Ok(Some(RpcValue::new("string", Value::from(head.unique_id()))))
            }
            _ => anyhow::bail!("unknown method '{}' on clusterManagement", method),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in commands and data sync
// ---------------------------------------------------------------------------

struct ClusterCommand {
    registry: Arc<NodeRegistry>,
}

#[async_trait]
impl CommandHandler for ClusterCommand {
    async fn execute(&self, _args: &[&str]) -> anyhow::Result<String> {
        let head = self.registry.head_node();
        let head_id = head.unique_id().to_string();

        let mut servers = self.registry.node_servers();
        servers.sort_by(|a, b| a.unique_id().cmp(b.unique_id()));

        let lines: Vec<String> = servers
            .iter()
            .map(|server| {
                format!(
                    "{}: {}{}",
                    server.unique_id(),
                    if server.available() { "available" } else { "unavailable" },
                    if server.unique_id() == head_id { " (head)" } else { "" },
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

struct ModulesCommand {
    provider: Arc<ModuleProvider>,
}

#[async_trait]
impl CommandHandler for ModulesCommand {
    async fn execute(&self, _args: &[&str]) -> anyhow::Result<String> {
        let modules = self.provider.modules();
        if modules.is_empty() {
            return Ok("no modules loaded".to_string());
        }

        let lines: Vec<String> = modules
            .iter()
            .map(|wrapper| format!("{} {}", wrapper.descriptor().coordinates(), wrapper.state()))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Replicates the user store between nodes: full document per sync
struct UserSyncHandler {
    users: Arc<armada_auth::service::user::UserManager>,
}

impl DataSyncHandler for UserSyncHandler {
    fn name(&self) -> &str {
        "users"
    }

    fn current_data(&self) -> Option<Value> {
        serde_json::to_value(self.users.users()).ok()
    }

    fn apply(&self, data: Value) -> anyhow::Result<()> {
        let users: Vec<User> = serde_json::from_value(data)?;
        debug!("applying synced user store with {} accounts", users.len());
        self.users.replace_all(users);
        Ok(())
    }
}
