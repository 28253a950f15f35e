//! Listening side of the channel layer
//!
//! Binds a TCP listener and turns every accepted connection into a
//! [`NetworkChannel`] chained to the server-wide listener registry. The
//! channel set prunes itself as channels close.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use armada_api::{model::HostAndPort, packet::Packet};
use dashmap::DashMap;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use super::{channel::NetworkChannel, registry::PacketListenerRegistry};
use crate::event::EventBus;

pub struct NetworkServer {
    packet_registry: Arc<PacketListenerRegistry>,
    channels: Arc<DashMap<Uuid, Arc<NetworkChannel>>>,
    local_address: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl NetworkServer {
    /// Bind `listen` and start accepting connections.
    pub async fn bind(listen: &HostAndPort, event_bus: Arc<EventBus>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address())
            .await
            .with_context(|| format!("failed to bind node listener on {}", listen))?;
        let local_address = listener
            .local_addr()
            .context("failed to resolve bound listener address")?;

        let packet_registry = Arc::new(PacketListenerRegistry::new());
        let channels: Arc<DashMap<Uuid, Arc<NetworkChannel>>> = Arc::new(DashMap::new());

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            packet_registry.clone(),
            channels.clone(),
            event_bus,
        ));

        info!(address = %local_address, "node listener bound");
        Ok(Self {
            packet_registry,
            channels,
            local_address,
            accept_task,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        packet_registry: Arc<PacketListenerRegistry>,
        channels: Arc<DashMap<Uuid, Arc<NetworkChannel>>>,
        event_bus: Arc<EventBus>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let channel =
                        NetworkChannel::launch(stream, true, packet_registry.clone(), event_bus.clone());
                    channels.insert(channel.id(), channel.clone());

                    // Prune the set once the channel goes away
                    let channels = channels.clone();
                    tokio::spawn(async move {
                        channel.wait_closed().await;
                        channels.remove(&channel.id());
                    });
                }
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Address the listener actually bound, which matters when the
    /// configured port was 0.
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Server-wide listener registry; every accepted channel chains to it.
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

    /// Queue a packet on every open channel.
    pub async fn broadcast(&self, packet: &Packet) {
        for channel in self.channels() {
            if channel.send(packet.clone()).await.is_err() {
                warn!(channel_id = %channel.id(), "dropping broadcast to closed channel");
            }
        }
    }

    /// Stop accepting and close every open channel.
    pub fn close(&self) {
        self.accept_task.abort();
        for channel in self.channels() {
            channel.close();
        }
        info!(address = %self.local_address, "node listener closed");
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
