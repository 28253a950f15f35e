//! Shared component bundle
//!
//! One instance per process, wiring the registries every subsystem and
//! loaded module works against. Handed around as `Arc<ComponentRegistry>`
//! the way request state is shared in the HTTP layer.

use std::sync::Arc;

use armada_api::model::{ClusterNode, NodeInfoSnapshot};

use crate::{
    cluster::{registry::NodeRegistry, sync::DataSyncRegistry},
    command::CommandProvider,
    event::EventBus,
    http::{HttpHandlerRegistry, SecurityRegistry},
    rpc::{handler::RpcHandlerRegistry, mapper::DataMapperRegistry},
};

pub struct ComponentRegistry {
    pub event_bus: Arc<EventBus>,
    pub node_registry: Arc<NodeRegistry>,
    pub data_sync_registry: Arc<DataSyncRegistry>,
    pub command_provider: Arc<CommandProvider>,
    pub http_handler_registry: Arc<HttpHandlerRegistry>,
    pub security_registry: Arc<SecurityRegistry>,
    pub data_mapper_registry: Arc<DataMapperRegistry>,
    pub rpc_handler_registry: Arc<RpcHandlerRegistry>,
}

impl ComponentRegistry {
    /// Build the bundle around a local node identity and its first
    /// snapshot.
    pub fn new(local: ClusterNode, snapshot: NodeInfoSnapshot) -> Self {
        let event_bus = Arc::new(EventBus::new());
        let node_registry = Arc::new(NodeRegistry::new(local, snapshot, event_bus.clone()));

        Self {
            event_bus,
            node_registry,
            data_sync_registry: Arc::new(DataSyncRegistry::new()),
            command_provider: Arc::new(CommandProvider::new()),
            http_handler_registry: Arc::new(HttpHandlerRegistry::new()),
            security_registry: Arc::new(SecurityRegistry::new()),
            data_mapper_registry: Arc::new(DataMapperRegistry::new()),
            rpc_handler_registry: Arc::new(RpcHandlerRegistry::new()),
        }
    }
}
