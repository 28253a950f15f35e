//! Named data-sync handlers
//!
//! A handler owns one named slice of node state (users, loaded module
//! list, ...). On join the full set is collected and pushed to the peer
//! over `cluster-data-sync`; incoming documents are routed back to the
//! handler of the same name. Unknown names are dropped with a warning so
//! version-skewed peers cannot wedge the channel.

use std::sync::Arc;

use armada_api::{model::OwnerToken, packet::SyncEntry};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

/// One named slice of synchronizable node state
pub trait DataSyncHandler: Send + Sync {
    /// Unique name of the slice this handler owns.
    fn name(&self) -> &str;

    /// Current local payload, or `None` when there is nothing to ship.
    fn current_data(&self) -> Option<Value>;

    /// Fold an incoming payload into local state.
    fn apply(&self, data: Value) -> anyhow::Result<()>;
}

struct RegisteredSyncHandler {
    owner: OwnerToken,
    handler: Arc<dyn DataSyncHandler>,
}

/// Name-keyed registry of data-sync handlers
pub struct DataSyncRegistry {
    handlers: DashMap<String, RegisteredSyncHandler>,
}

impl DataSyncRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler under `owner`. A handler re-registered under the
    /// same name replaces the previous one.
    pub fn register_handler(&self, owner: OwnerToken, handler: Arc<dyn DataSyncHandler>) {
        let name = handler.name().to_string();
        debug!(name = %name, owner = %owner, "registered data sync handler");
        self.handlers
            .insert(name, RegisteredSyncHandler { owner, handler });
    }

    /// Remove every handler registered under `owner`.
    pub fn unregister_handlers(&self, owner: OwnerToken) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|_, entry| entry.owner != owner);
        before - self.handlers.len()
    }

    pub fn handler_count(&self, owner: OwnerToken) -> usize {
        self.handlers
            .iter()
            .filter(|entry| entry.value().owner == owner)
            .count()
    }

    /// Route one incoming document to its handler. Unknown names and
    /// handler failures are logged and dropped; one bad document must not
    /// stop the rest of a sync batch.
    pub fn handle_incoming(&self, entry: SyncEntry) {
        let Some(registered) = self.handlers.get(&entry.name) else {
            warn!(name = %entry.name, "dropping sync payload without a registered handler");
            return;
        };

        if let Err(error) = registered.handler.apply(entry.data) {
            warn!(name = %entry.name, %error, "data sync handler failed to apply payload");
        }
    }

    /// Collect every handler's current payload for a full-state push.
    pub fn collect_all(&self) -> Vec<SyncEntry> {
        let mut entries: Vec<SyncEntry> = self
            .handlers
            .iter()
            .filter_map(|registered| {
                registered
                    .value()
                    .handler
                    .current_data()
                    .map(|data| SyncEntry {
                        name: registered.key().clone(),
                        data,
                    })
            })
            .collect();
        // Deterministic push order keeps join traffic reproducible
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

impl Default for DataSyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}
