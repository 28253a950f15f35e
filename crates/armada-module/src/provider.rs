//! Module provider
//!
//! Drives modules through `Created → Loaded → Started → Stopped →
//! Unloaded`. Lifecycle operations serialize on one mutex; lookups stay
//! lock-free on the module map.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use armada_api::module::{ManifestError, ModuleDescriptor, ModuleState};
use armada_core::ComponentRegistry;

use crate::module::{Module, ModuleContext, ModuleLifecycleEvent};
use crate::wrapper::ModuleWrapper;

#[derive(thiserror::Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("module '{module}' is already loaded")]
    AlreadyLoaded { module: String },

    #[error("module '{module}' not exist")]
    Unknown { module: String },

    #[error("module '{module}' requires '{dependency}' which is not loaded")]
    UnresolvedDependency { module: String, dependency: String },

    #[error("cannot stop module '{module}', still required by: {}", .dependents.join(", "))]
    DependentModulesRunning {
        module: String,
        dependents: Vec<String>,
    },

    #[error("module '{module}' cannot change state from {from} to {to}")]
    IllegalStateChange {
        module: String,
        from: ModuleState,
        to: ModuleState,
    },

    #[error("start of module '{module}' failed: {source}")]
    StartFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Hook points around module start and stop.
///
/// The node installs a handler whose post-stop callback removes every
/// registration the module left behind; see the node crate for the
/// teardown itself.
#[async_trait]
pub trait ModuleProviderHandler: Send + Sync {
    async fn handle_pre_module_start(&self, _module: &ModuleWrapper) {}
    async fn handle_post_module_start(&self, _module: &ModuleWrapper) {}
    async fn handle_pre_module_stop(&self, _module: &ModuleWrapper) {}
    async fn handle_post_module_stop(&self, _module: &ModuleWrapper) {}
}

pub struct ModuleProvider {
    components: Arc<ComponentRegistry>,
    modules: DashMap<String, Arc<ModuleWrapper>>,
    handler: RwLock<Option<Arc<dyn ModuleProviderHandler>>>,
    lifecycle: Mutex<()>,
}

impl ModuleProvider {
    pub fn new(components: Arc<ComponentRegistry>) -> Self {
        Self {
            components,
            modules: DashMap::new(),
            handler: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Install the lifecycle handler. Expected to happen once during node
    /// construction, before any module is loaded.
    pub fn set_handler(&self, handler: Arc<dyn ModuleProviderHandler>) {
        if let Ok(mut slot) = self.handler.write() {
            *slot = Some(handler);
        }
    }

    pub fn module(&self, name: &str) -> Option<Arc<ModuleWrapper>> {
        self.modules.get(name).map(|entry| entry.value().clone())
    }

    pub fn modules(&self) -> Vec<Arc<ModuleWrapper>> {
        let mut modules: Vec<Arc<ModuleWrapper>> = self
            .modules
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        modules.sort_by(|a, b| a.name().cmp(b.name()));
        modules
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Validate the manifest, resolve local dependencies and move the
    /// module to Loaded.
    pub async fn load_module(
        &self,
        descriptor: ModuleDescriptor,
        module: Arc<dyn Module>,
    ) -> Result<Arc<ModuleWrapper>, ModuleError> {
        let _lifecycle = self.lifecycle.lock().await;

        descriptor.validate()?;
        if self.modules.contains_key(&descriptor.name) {
            return Err(ModuleError::AlreadyLoaded {
                module: descriptor.name,
            });
        }

        // Dependencies without a repo or URL must already be loaded here
        for dependency in &descriptor.dependencies {
            if !dependency.satisfied_locally() {
                continue;
            }
            let resolved = self.modules.iter().any(|entry| {
                let loaded = entry.value().descriptor();
                dependency.group.as_deref() == Some(loaded.group.as_str())
                    && dependency.name.as_deref() == Some(loaded.name.as_str())
            });
            if !resolved {
                return Err(ModuleError::UnresolvedDependency {
                    module: descriptor.name,
                    dependency: dependency.to_string(),
                });
            }
        }

        let wrapper = Arc::new(ModuleWrapper::new(descriptor, module));
        wrapper.change_state(ModuleState::Loaded)?;
        self.modules
            .insert(wrapper.name().to_string(), wrapper.clone());

        info!(
            "loaded module '{}' ({})",
            wrapper.name(),
            wrapper.descriptor().coordinates()
        );
        self.publish_lifecycle(&wrapper, ModuleState::Loaded);

        Ok(wrapper)
    }

    /// Run the module's start hook and move it to Started.
    ///
    /// A failing start hook leaves the module in its previous state and
    /// propagates the error.
    pub async fn start_module(&self, name: &str) -> Result<(), ModuleError> {
        let _lifecycle = self.lifecycle.lock().await;
        let wrapper = self.module(name).ok_or_else(|| ModuleError::Unknown {
            module: name.to_string(),
        })?;

        let state = wrapper.state();
        if !state.can_change_to(ModuleState::Started) {
            return Err(ModuleError::IllegalStateChange {
                module: name.to_string(),
                from: state,
                to: ModuleState::Started,
            });
        }

        if let Some(handler) = self.handler() {
            handler.handle_pre_module_start(&wrapper).await;
        }

        let context = self.context_for(&wrapper);
        if let Err(source) = wrapper.module().start(&context).await {
            warn!("start of module '{}' failed, module stays {}", name, state);
            return Err(ModuleError::StartFailed {
                module: name.to_string(),
                source,
            });
        }

        wrapper.change_state(ModuleState::Started)?;
        info!("started module '{}'", name);
        self.publish_lifecycle(&wrapper, ModuleState::Started);

        if let Some(handler) = self.handler() {
            handler.handle_post_module_start(&wrapper).await;
        }

        Ok(())
    }

    /// Move a started module to Stopped.
    ///
    /// Refused while another started module depends on this one. A failing
    /// stop hook is logged; the post-stop handler still runs so framework
    /// registrations never leak.
    pub async fn stop_module(&self, name: &str) -> Result<(), ModuleError> {
        let _lifecycle = self.lifecycle.lock().await;
        let wrapper = self.module(name).ok_or_else(|| ModuleError::Unknown {
            module: name.to_string(),
        })?;

        let state = wrapper.state();
        if !state.can_change_to(ModuleState::Stopped) {
            return Err(ModuleError::IllegalStateChange {
                module: name.to_string(),
                from: state,
                to: ModuleState::Stopped,
            });
        }

        let dependents = self.started_dependents(wrapper.descriptor());
        if !dependents.is_empty() {
            return Err(ModuleError::DependentModulesRunning {
                module: name.to_string(),
                dependents,
            });
        }

        if let Some(handler) = self.handler() {
            handler.handle_pre_module_stop(&wrapper).await;
        }

        let context = self.context_for(&wrapper);
        if let Err(e) = wrapper.module().stop(&context).await {
            warn!("stop hook of module '{}' failed: {:#}", name, e);
        }

        wrapper.change_state(ModuleState::Stopped)?;
        info!("stopped module '{}'", name);
        self.publish_lifecycle(&wrapper, ModuleState::Stopped);

        if let Some(handler) = self.handler() {
            handler.handle_post_module_stop(&wrapper).await;
        }

        Ok(())
    }

    /// Remove a stopped (or never started) module from the provider.
    pub async fn unload_module(&self, name: &str) -> Result<(), ModuleError> {
        let _lifecycle = self.lifecycle.lock().await;
        let wrapper = self.module(name).ok_or_else(|| ModuleError::Unknown {
            module: name.to_string(),
        })?;

        wrapper.change_state(ModuleState::Unloaded)?;
        self.modules.remove(name);

        info!("unloaded module '{}'", name);
        self.publish_lifecycle(&wrapper, ModuleState::Unloaded);

        Ok(())
    }

    /// Stop every started module, dependents before their dependencies.
    pub async fn stop_all(&self) {
        loop {
            let started: Vec<String> = self
                .modules
                .iter()
                .filter(|entry| entry.value().state() == ModuleState::Started)
                .map(|entry| entry.key().clone())
                .collect();
            if started.is_empty() {
                break;
            }

            let mut progressed = false;
            for name in started {
                match self.stop_module(&name).await {
                    Ok(()) => progressed = true,
                    // Still required by another started module, next round
                    Err(ModuleError::DependentModulesRunning { .. }) => {}
                    Err(e) => warn!("failed to stop module '{}' during shutdown: {}", name, e),
                }
            }
            if !progressed {
                warn!("module shutdown stalled, started modules depend on each other");
                break;
            }
        }
    }

    fn handler(&self) -> Option<Arc<dyn ModuleProviderHandler>> {
        self.handler.read().ok().and_then(|guard| guard.clone())
    }

    fn context_for(&self, wrapper: &ModuleWrapper) -> ModuleContext {
        ModuleContext::new(
            wrapper.owner(),
            wrapper.descriptor().clone(),
            self.components.clone(),
        )
    }

    fn publish_lifecycle(&self, wrapper: &ModuleWrapper, state: ModuleState) {
        self.components.event_bus.publish(&ModuleLifecycleEvent {
            module_name: wrapper.name().to_string(),
            state,
        });
    }

    /// Names of started modules declaring a locally-satisfied dependency
    /// on `descriptor`, sorted for stable error messages.
    fn started_dependents(&self, descriptor: &ModuleDescriptor) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .modules
            .iter()
            .filter(|entry| entry.value().state() == ModuleState::Started)
            .filter(|entry| {
                entry
                    .value()
                    .descriptor()
                    .dependencies
                    .iter()
                    .any(|dependency| {
                        dependency.satisfied_locally()
                            && dependency.group.as_deref() == Some(descriptor.group.as_str())
                            && dependency.name.as_deref() == Some(descriptor.name.as_str())
                    })
            })
            .map(|entry| entry.key().clone())
            .collect();
        dependents.sort();
        dependents
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use armada_api::model::{ClusterNode, NodeInfoSnapshot};
    use armada_api::module::ModuleDependency;

    use super::*;

    struct TestModule {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
        fail_stop: bool,
    }

    impl TestModule {
        fn with_flags(fail_start: bool, fail_stop: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start,
                fail_stop,
            })
        }

        fn new() -> Arc<Self> {
            Self::with_flags(false, false)
        }

        fn failing_start() -> Arc<Self> {
            Self::with_flags(true, false)
        }

        fn failing_stop() -> Arc<Self> {
            Self::with_flags(false, true)
        }
    }

    #[async_trait]
    impl Module for TestModule {
        async fn start(&self, _context: &ModuleContext) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("start hook exploded");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                anyhow::bail!("stop hook exploded");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        post_stops: AtomicUsize,
    }

    #[async_trait]
    impl ModuleProviderHandler for RecordingHandler {
        async fn handle_post_module_stop(&self, _module: &ModuleWrapper) {
            self.post_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn provider() -> ModuleProvider {
        let components = Arc::new(ComponentRegistry::new(
            ClusterNode::new("Node-1", Vec::new()),
            NodeInfoSnapshot::new(1_000),
        ));
        ModuleProvider::new(components)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let provider = provider();
        let module = TestModule::new();

        let wrapper = provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                module.clone(),
            )
            .await
            .unwrap();
        assert_eq!(wrapper.state(), ModuleState::Loaded);

        provider.start_module("bridge").await.unwrap();
        assert_eq!(wrapper.state(), ModuleState::Started);
        assert_eq!(module.starts.load(Ordering::SeqCst), 1);

        provider.stop_module("bridge").await.unwrap();
        assert_eq!(wrapper.state(), ModuleState::Stopped);
        assert_eq!(module.stops.load(Ordering::SeqCst), 1);

        provider.unload_module("bridge").await.unwrap();
        assert!(provider.module("bridge").is_none());
        assert_eq!(provider.module_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_load_is_rejected() {
        let provider = provider();
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();

        let error = provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "2.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ModuleError::AlreadyLoaded { .. }));
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_rejected() {
        let provider = provider();
        let error = provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ModuleError::Manifest(_)));
    }

    #[tokio::test]
    async fn test_local_dependency_must_be_loaded() {
        let provider = provider();

        let mut descriptor = ModuleDescriptor::new("eu.armada", "signs", "1.0.0");
        descriptor
            .dependencies
            .push(ModuleDependency::new("eu.armada", "bridge", "1.0.0"));

        let error = provider
            .load_module(descriptor.clone(), TestModule::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ModuleError::UnresolvedDependency { .. }));

        // Loading the dependency first resolves it
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();
        provider
            .load_module(descriptor, TestModule::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_downloadable_dependency_skips_local_check() {
        let provider = provider();

        let mut descriptor = ModuleDescriptor::new("eu.armada", "signs", "1.0.0");
        descriptor.dependencies.push(ModuleDependency {
            url: Some("https://example.com/bridge.jar".to_string()),
            ..ModuleDependency::new("eu.armada", "bridge", "1.0.0")
        });

        provider
            .load_module(descriptor, TestModule::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_keeps_previous_state() {
        let provider = provider();
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "broken", "1.0.0"),
                TestModule::failing_start(),
            )
            .await
            .unwrap();

        let error = provider.start_module("broken").await.unwrap_err();
        assert!(matches!(error, ModuleError::StartFailed { .. }));
        assert_eq!(
            provider.module("broken").unwrap().state(),
            ModuleState::Loaded
        );

        // A started module cannot be unloaded, but a loaded one can
        provider.unload_module("broken").await.unwrap();
    }

    #[tokio::test]
    async fn test_started_module_cannot_be_unloaded() {
        let provider = provider();
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();
        provider.start_module("bridge").await.unwrap();

        let error = provider.unload_module("bridge").await.unwrap_err();
        assert!(matches!(error, ModuleError::IllegalStateChange { .. }));
        assert_eq!(
            provider.module("bridge").unwrap().state(),
            ModuleState::Started
        );
    }

    #[tokio::test]
    async fn test_stop_refused_while_dependents_run() {
        let provider = provider();
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();

        let mut dependent = ModuleDescriptor::new("eu.armada", "signs", "1.0.0");
        dependent
            .dependencies
            .push(ModuleDependency::new("eu.armada", "bridge", "1.0.0"));
        provider
            .load_module(dependent, TestModule::new())
            .await
            .unwrap();

        provider.start_module("bridge").await.unwrap();
        provider.start_module("signs").await.unwrap();

        let error = provider.stop_module("bridge").await.unwrap_err();
        match error {
            ModuleError::DependentModulesRunning { dependents, .. } => {
                assert_eq!(dependents, vec!["signs".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }

        provider.stop_module("signs").await.unwrap();
        provider.stop_module("bridge").await.unwrap();
    }

    #[tokio::test]
    async fn test_post_stop_handler_runs_despite_failing_stop_hook() {
        let provider = provider();
        let handler = Arc::new(RecordingHandler::default());
        provider.set_handler(handler.clone());

        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "flaky", "1.0.0"),
                TestModule::failing_stop(),
            )
            .await
            .unwrap();
        provider.start_module("flaky").await.unwrap();

        provider.stop_module("flaky").await.unwrap();
        assert_eq!(handler.post_stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.module("flaky").unwrap().state(),
            ModuleState::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_all_orders_dependents_first() {
        let provider = provider();
        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();

        let mut dependent = ModuleDescriptor::new("eu.armada", "signs", "1.0.0");
        dependent
            .dependencies
            .push(ModuleDependency::new("eu.armada", "bridge", "1.0.0"));
        provider
            .load_module(dependent, TestModule::new())
            .await
            .unwrap();

        provider.start_module("bridge").await.unwrap();
        provider.start_module("signs").await.unwrap();

        provider.stop_all().await;
        assert_eq!(
            provider.module("bridge").unwrap().state(),
            ModuleState::Stopped
        );
        assert_eq!(
            provider.module("signs").unwrap().state(),
            ModuleState::Stopped
        );
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_published() {
        let provider = provider();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = seen.clone();
        provider.components.event_bus.register_listener::<ModuleLifecycleEvent, _>(
            armada_api::model::OwnerToken::random(),
            move |event| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push((event.module_name.clone(), event.state));
                }
            },
        );

        provider
            .load_module(
                ModuleDescriptor::new("eu.armada", "bridge", "1.0.0"),
                TestModule::new(),
            )
            .await
            .unwrap();
        provider.start_module("bridge").await.unwrap();
        provider.stop_module("bridge").await.unwrap();
        provider.unload_module("bridge").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("bridge".to_string(), ModuleState::Loaded),
                ("bridge".to_string(), ModuleState::Started),
                ("bridge".to_string(), ModuleState::Stopped),
                ("bridge".to_string(), ModuleState::Unloaded),
            ]
        );
    }
}
