//! Guaranteed teardown of everything a module registered
//!
//! Modules extend the node through owner-scoped registries; this handler
//! runs after every module stop and evicts the module's registrations in
//! six categories, in a fixed order. Each category is cleaned in
//! isolation so one noisy registry never leaves another dirty.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use armada_core::{ComponentRegistry, NetworkClient, NetworkServer};
use armada_module::{ModuleProviderHandler, ModuleWrapper};

pub struct NodeModuleHandler {
    components: Arc<ComponentRegistry>,
    client: Arc<NetworkClient>,
    server: Arc<RwLock<Option<Arc<NetworkServer>>>>,
}

impl NodeModuleHandler {
    pub fn new(
        components: Arc<ComponentRegistry>,
        client: Arc<NetworkClient>,
        server: Arc<RwLock<Option<Arc<NetworkServer>>>>,
    ) -> Self {
        Self {
            components,
            client,
            server,
        }
    }

    /// Remove the module's packet listeners from the endpoint registries
    /// and from every currently connected channel on both endpoints.
    fn remove_packet_listeners(&self, wrapper: &ModuleWrapper) -> usize {
        let owner = wrapper.owner();
        let mut removed = 0;

        let server = self
            .server
            .read()
            .unwrap_or_else(|poisoned| {
                warn!("recovering server slot lock poisoned by a panicked thread");
                poisoned.into_inner()
            })
            .clone();

        if let Some(server) = server {
            removed += server.packet_registry().remove_listeners(owner);
            for channel in server.channels() {
                removed += channel.packet_registry().remove_listeners(owner);
            }
        }

        removed += self.client.packet_registry().remove_listeners(owner);
        for channel in self.client.channels() {
            removed += channel.packet_registry().remove_listeners(owner);
        }

        removed
    }
}

#[async_trait]
impl ModuleProviderHandler for NodeModuleHandler {
    async fn handle_post_module_stop(&self, module: &ModuleWrapper) {
        let owner = module.owner();
        let name = &module.descriptor().name;

        let http_handlers = self.components.http_handler_registry.remove_handlers(owner);
        let security_rules = self.components.security_registry.remove_rules(owner);
        debug!(
            "module '{}': removed {} http handlers, {} security rules",
            name, http_handlers, security_rules
        );

        let packet_listeners = self.remove_packet_listeners(module);
        debug!("module '{}': removed {} packet listeners", name, packet_listeners);

        let event_listeners = self.components.event_bus.unregister_listeners(owner);
        debug!("module '{}': removed {} event listeners", name, event_listeners);

        let commands = self.components.command_provider.unregister(owner);
        debug!("module '{}': removed {} commands", name, commands);

        let sync_handlers = self.components.data_sync_registry.unregister_handlers(owner);
        debug!("module '{}': removed {} data sync handlers", name, sync_handlers);

        let mapper_bindings = self.components.data_mapper_registry.unregister_bindings(owner);
        debug!("module '{}': removed {} mapper bindings", name, mapper_bindings);

        info!(
            "cleaned up after module '{}': {} registrations removed",
            name,
            http_handlers
                + security_rules
                + packet_listeners
                + event_listeners
                + commands
                + sync_handlers
                + mapper_bindings
        );
    }
}
