//! Loaded module bookkeeping

use std::sync::{Arc, RwLock};

use tracing::warn;

use armada_api::model::OwnerToken;
use armada_api::module::{ModuleDescriptor, ModuleState};

use crate::module::Module;
use crate::provider::ModuleError;

/// One loaded module together with its lifecycle state and owner token
pub struct ModuleWrapper {
    descriptor: ModuleDescriptor,
    owner: OwnerToken,
    module: Arc<dyn Module>,
    state: RwLock<ModuleState>,
}

impl std::fmt::Debug for ModuleWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleWrapper")
            .field("descriptor", &self.descriptor)
            .field("owner", &self.owner)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ModuleWrapper {
    pub fn new(descriptor: ModuleDescriptor, module: Arc<dyn Module>) -> Self {
        Self {
            descriptor,
            owner: OwnerToken::random(),
            module,
            state: RwLock::new(ModuleState::Created),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn owner(&self) -> OwnerToken {
        self.owner
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn state(&self) -> ModuleState {
        *self.state.read().unwrap_or_else(|poisoned| {
            warn!("recovering module state lock poisoned by a panicked thread");
            poisoned.into_inner()
        })
    }

    /// Move the lifecycle to `target`, verifying the transition is legal.
    ///
    /// Check and update happen under one write guard so concurrent calls
    /// cannot both succeed for the same transition.
    pub(crate) fn change_state(&self, target: ModuleState) -> Result<ModuleState, ModuleError> {
        let mut state = self.state.write().unwrap_or_else(|poisoned| {
            warn!("recovering module state lock poisoned by a panicked thread");
            poisoned.into_inner()
        });

        if !state.can_change_to(target) {
            return Err(ModuleError::IllegalStateChange {
                module: self.descriptor.name.clone(),
                from: *state,
                to: target,
            });
        }

        let previous = *state;
        *state = target;
        Ok(previous)
    }
}
