//! Module trait and per-module context

use std::sync::Arc;

use async_trait::async_trait;

use armada_api::model::OwnerToken;
use armada_api::module::{ModuleDescriptor, ModuleState};
use armada_core::ComponentRegistry;

/// A feature module hosted by the node.
///
/// `start` is where a module registers its listeners, handlers, commands
/// and bindings; everything registered under the context's owner token is
/// removed by the node after `stop`, so modules do not have to write
/// teardown code for framework-level registrations.
#[async_trait]
pub trait Module: Send + Sync {
    async fn start(&self, context: &ModuleContext) -> anyhow::Result<()>;

    async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Everything a module needs to interact with the hosting node
pub struct ModuleContext {
    owner: OwnerToken,
    descriptor: ModuleDescriptor,
    components: Arc<ComponentRegistry>,
}

impl ModuleContext {
    pub fn new(
        owner: OwnerToken,
        descriptor: ModuleDescriptor,
        components: Arc<ComponentRegistry>,
    ) -> Self {
        Self {
            owner,
            descriptor,
            components,
        }
    }

    /// The token all of this module's registrations are tracked under
    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn components(&self) -> &Arc<ComponentRegistry> {
        &self.components
    }
}

/// Published on the event bus after every successful state transition
#[derive(Clone, Debug)]
pub struct ModuleLifecycleEvent {
    pub module_name: String,
    pub state: ModuleState,
}
