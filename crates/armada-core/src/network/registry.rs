//! Packet listener registration and dispatch
//!
//! Listeners subscribe to a logical channel name and are invoked in
//! registration order. Each network channel owns a registry chained to its
//! endpoint's registry, so endpoint-wide listeners see traffic from every
//! channel while per-channel listeners stay scoped. Registrations carry an
//! owner token; evicting an owner removes all of its listeners in one
//! sweep.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use armada_api::{model::OwnerToken, packet::Packet};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::channel::NetworkChannel;

/// What a listener decided about the packet it was handed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Let the remaining listeners on the chain see the packet
    Continue,
    /// The packet is fully handled; stop dispatch for it
    Consume,
}

/// Receives packets for one logical channel name
#[async_trait]
pub trait PacketListener: Send + Sync {
    async fn handle(
        &self,
        channel: &Arc<NetworkChannel>,
        packet: &Packet,
    ) -> anyhow::Result<PacketDisposition>;
}

struct RegisteredPacketListener {
    owner: OwnerToken,
    listener: Arc<dyn PacketListener>,
}

/// Channel-name-keyed listener table, optionally chained to a parent
pub struct PacketListenerRegistry {
    parent: Option<Arc<PacketListenerRegistry>>,
    listeners: RwLock<HashMap<String, Vec<RegisteredPacketListener>>>,
}

impl PacketListenerRegistry {
    pub fn new() -> Self {
        Self {
            parent: None,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// A registry whose dispatch falls through to `parent` after its own
    /// listeners ran.
    pub fn with_parent(parent: Arc<PacketListenerRegistry>) -> Self {
        Self {
            parent: Some(parent),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_listener(
        &self,
        owner: OwnerToken,
        channel_name: impl Into<String>,
        listener: Arc<dyn PacketListener>,
    ) {
        let channel_name = channel_name.into();
        debug!(channel = %channel_name, owner = %owner, "registered packet listener");
        if let Ok(mut listeners) = self.listeners.write() {
            listeners
                .entry(channel_name)
                .or_default()
                .push(RegisteredPacketListener { owner, listener });
        }
    }

    /// Remove every listener registered under `owner` in this registry.
    /// Parent registries are not touched; an endpoint and its channels are
    /// swept separately.
    pub fn remove_listeners(&self, owner: OwnerToken) -> usize {
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

    fn listeners_for(&self, channel_name: &str) -> Vec<Arc<dyn PacketListener>> {
        self.listeners
            .read()
            .map(|listeners| {
                listeners
                    .get(channel_name)
                    .map(|entries| entries.iter().map(|entry| entry.listener.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Run `packet` through this registry's listeners and then the parent
    /// chain. A `Consume` disposition stops dispatch; a listener error is
    /// logged and treated as `Continue` so one broken listener cannot
    /// starve the rest. Returns the number of listeners that ran.
    pub async fn dispatch(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> usize {
        let mut handled = 0;
        let mut registry = Some(self);

        while let Some(current) = registry {
            // Clones are taken so listeners run outside the table lock and
            // may themselves register or remove listeners.
            for listener in current.listeners_for(&packet.channel) {
                handled += 1;
                match listener.handle(channel, packet).await {
                    Ok(PacketDisposition::Consume) => return handled,
                    Ok(PacketDisposition::Continue) => {}
                    Err(error) => {
                        warn!(
                            channel = %packet.channel,
                            %error,
                            "packet listener failed; continuing dispatch"
                        );
                    }
                }
            }
            registry = current.parent.as_deref();
        }

        handled
    }
}

impl Default for PacketListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
