//! Dialing side of the channel layer
//!
//! Opens outbound connections and tracks them as channels chained to the
//! client-wide listener registry, mirroring [`NetworkServer`] for the
//! connecting direction.
//!
//! [`NetworkServer`]: super::server::NetworkServer

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use armada_api::model::HostAndPort;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tracing::info;
use uuid::Uuid;

use super::{channel::NetworkChannel, registry::PacketListenerRegistry};
use crate::event::EventBus;

pub struct NetworkClient {
    packet_registry: Arc<PacketListenerRegistry>,
    channels: Arc<DashMap<Uuid, Arc<NetworkChannel>>>,
    event_bus: Arc<EventBus>,
    connect_timeout: Duration,
}

impl NetworkClient {
    pub fn new(event_bus: Arc<EventBus>, connect_timeout: Duration) -> Self {
        Self {
            packet_registry: Arc::new(PacketListenerRegistry::new()),
            channels: Arc::new(DashMap::new()),
            event_bus,
            connect_timeout,
        }
    }

    /// Dial `target` and return the established channel.
    pub async fn connect(&self, target: &HostAndPort) -> anyhow::Result<Arc<NetworkChannel>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target.address()))
            .await
            .with_context(|| format!("connecting to {} timed out", target))?
            .with_context(|| format!("failed to connect to {}", target))?;

        let channel = NetworkChannel::launch(
            stream,
            false,
            self.packet_registry.clone(),
            self.event_bus.clone(),
        );
        self.channels.insert(channel.id(), channel.clone());
        info!(remote = %target, channel_id = %channel.id(), "connected to node");

        let channels = self.channels.clone();
        let tracked = channel.clone();
        tokio::spawn(async move {
            tracked.wait_closed().await;
            channels.remove(&tracked.id());
        });

        Ok(channel)
    }

    /// Client-wide listener registry; every dialed channel chains to it.
    pub fn packet_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.packet_registry
    }

    pub fn channels(&self) -> Vec<Arc<NetworkChannel>> {
        self.channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Close every dialed channel.
    pub fn close(&self) {
        for channel in self.channels() {
            channel.close();
        }
    }
}
