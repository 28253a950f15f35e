//! Process-wide event bus
//!
//! Typed publish/subscribe used by the cluster layer and by feature
//! modules. Every listener is registered under an owner token so a module's
//! listeners can be evicted in one sweep when it unloads. Listeners for one
//! event type run synchronously in registration order; a broadcast feed of
//! event type names is exposed for observability.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio::sync::broadcast;

use armada_api::model::OwnerToken;

const EVENT_FEED_CAPACITY: usize = 256;

struct RegisteredListener {
    owner: OwnerToken,
    handler: Arc<dyn Fn(&dyn Any) + Send + Sync>,
}

/// Typed event bus with owner-scoped listener registration
pub struct EventBus {
    listeners: RwLock<HashMap<TypeId, Vec<RegisteredListener>>>,
    feed_tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Self {
            listeners: RwLock::new(HashMap::new()),
            feed_tx,
        }
    }

    /// Register a listener for events of type `E` under `owner`.
    pub fn register_listener<E, F>(&self, owner: OwnerToken, listener: F)
    where
        E: Any + Send + Sync,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handler: Arc<dyn Fn(&dyn Any) + Send + Sync> = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                listener(event);
            }
        });

        if let Ok(mut listeners) = self.listeners.write() {
            listeners
                .entry(TypeId::of::<E>())
                .or_default()
                .push(RegisteredListener { owner, handler });
        }
    }

    /// Publish `event` to every listener registered for its type, in
    /// registration order.
    pub fn publish<E: Any + Send + Sync>(&self, event: &E) {
        let handlers: Vec<Arc<dyn Fn(&dyn Any) + Send + Sync>> = match self.listeners.read() {
            Ok(listeners) => listeners
                .get(&TypeId::of::<E>())
                .map(|entries| entries.iter().map(|entry| entry.handler.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };

        // Handlers run outside the lock so they may register listeners
        for handler in handlers {
            handler(event);
        }

        let _ = self.feed_tx.send(std::any::type_name::<E>().to_string());
    }

    /// Remove every listener registered under `owner`, across all event
    /// types. Safe to call when the owner registered nothing.
    pub fn unregister_listeners(&self, owner: OwnerToken) -> usize {
        let mut removed = 0;
        if let Ok(mut listeners) = self.listeners.write() {
            for entries in listeners.values_mut() {
                let before = entries.len();
                entries.retain(|entry| entry.owner != owner);
                removed += before - entries.len();
            }
            listeners.retain(|_, entries| !entries.is_empty());
        }
        removed
    }

    /// Number of listeners currently registered under `owner`.
    pub fn listener_count(&self, owner: OwnerToken) -> usize {
        self.listeners
            .read()
            .map(|listeners| {
                listeners
                    .values()
                    .flat_map(|entries| entries.iter())
                    .filter(|entry| entry.owner == owner)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Subscribe to the feed of published event type names.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.feed_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
