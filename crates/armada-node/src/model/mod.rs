//! Application state and HTTP response models

pub mod response;

use std::sync::Arc;

use armada_auth::service::AuthService;
use armada_core::components::ComponentRegistry;
use armada_module::ModuleProvider;

use crate::startup::Configuration;

/// Application state shared across all HTTP handlers
pub struct AppState {
    pub configuration: Configuration,
    pub components: Arc<ComponentRegistry>,
    pub auth_service: Arc<AuthService>,
    pub module_provider: Arc<ModuleProvider>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("configuration", &self.configuration)
            .field("components", &"<ComponentRegistry>")
            .field("auth_service", &"<AuthService>")
            .field("module_provider", &"<ModuleProvider>")
            .finish()
    }
}
