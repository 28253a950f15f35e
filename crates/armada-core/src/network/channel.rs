//! One established connection between two processes
//!
//! A channel owns its socket through two tasks: a writer draining an
//! outbound queue and a reader decoding frames. Inbound responses are
//! routed to the channel's query manager; everything else goes through the
//! channel's listener registry, which chains to the endpoint registry.
//! Either side closing the socket (or a deliberate `close`) stops both
//! tasks, fails every pending query and announces a close event.

use std::{sync::Arc, time::Duration};

use armada_api::packet::Packet;
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, watch},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    codec,
    query::{QueryError, QueryPacketManager},
    registry::PacketListenerRegistry,
};
use crate::{
    cluster::event::{ChannelCloseEvent, ChannelOpenEvent},
    event::EventBus,
};

const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// Sending on a channel that is no longer usable
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("network channel is closed")]
    Closed,
}

pub struct NetworkChannel {
    id: Uuid,
    remote_address: String,
    server_channel: bool,
    packet_registry: Arc<PacketListenerRegistry>,
    queries: QueryPacketManager,
    outbound: mpsc::Sender<Packet>,
    closed: watch::Sender<bool>,
}

impl NetworkChannel {
    /// Take ownership of an established stream and start its reader and
    /// writer tasks. `parent_registry` is the endpoint registry this
    /// channel's own registry chains to.
    pub fn launch(
        stream: TcpStream,
        server_channel: bool,
        parent_registry: Arc<PacketListenerRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Arc<NetworkChannel> {
        let remote_address = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (closed_tx, _) = watch::channel(false);

        let channel = Arc::new(Self {
            id: Uuid::new_v4(),
            remote_address,
            server_channel,
            packet_registry: Arc::new(PacketListenerRegistry::with_parent(parent_registry)),
            queries: QueryPacketManager::new(),
            outbound: outbound_tx,
            closed: closed_tx,
        });

        // Receivers are taken before spawning so a close issued right
        // after launch is never missed by either loop.
        let write_closed = channel.closed.subscribe();
        let read_closed = channel.closed.subscribe();
        tokio::spawn(Self::write_loop(
            channel.clone(),
            write_half,
            outbound_rx,
            write_closed,
        ));
        tokio::spawn(Self::read_loop(
            channel.clone(),
            read_half,
            read_closed,
            event_bus.clone(),
        ));

        debug!(
            channel_id = %channel.id,
            remote = %channel.remote_address,
            server_channel,
            "network channel opened"
        );
        event_bus.publish(&ChannelOpenEvent {
            channel_id: channel.id,
            remote_address: channel.remote_address.clone(),
            server_channel,
        });
        channel
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn is_server_channel(&self) -> bool {
        self.server_channel
    }

    /// This channel's own listener registry. Listeners added here see only
    /// this channel's traffic.
    pub fn packet_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.packet_registry
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the channel has closed, for any reason.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queue a packet for transmission.
    pub async fn send(&self, packet: Packet) -> Result<(), ChannelError> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Send a query packet and await the response carrying its correlation
    /// id. On timeout the id is retired and a late response is discarded.
    pub async fn query(&self, packet: Packet, timeout: Duration) -> Result<Packet, QueryError> {
        let correlation_id = packet.correlation_id;
        let receiver = self.queries.register(correlation_id);

        if self.send(packet).await.is_err() {
            self.queries.retire(&correlation_id);
            return Err(QueryError::ChannelClosed { correlation_id });
        }
        self.queries.wait(correlation_id, receiver, timeout).await
    }

    /// Initiate a deliberate close. Idempotent; both socket tasks stop and
    /// pending queries fail.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    async fn write_loop(
        channel: Arc<NetworkChannel>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Packet>,
        mut closed: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                maybe_packet = outbound.recv() => match maybe_packet {
                    Some(packet) => {
                        if let Err(error) = codec::write_frame(&mut writer, &packet).await {
                            warn!(channel_id = %channel.id, %error, "channel write failed");
                            channel.close();
                            break;
                        }
                    }
                    None => break,
                },
                _ = closed.changed() => break,
            }
        }
        let _ = writer.shutdown().await;
    }

    async fn read_loop(
        channel: Arc<NetworkChannel>,
        mut reader: OwnedReadHalf,
        mut closed: watch::Receiver<bool>,
        event_bus: Arc<EventBus>,
    ) {
        loop {
            tokio::select! {
                frame = codec::read_frame(&mut reader) => match frame {
                    Ok(packet) => channel.route_inbound(packet).await,
                    Err(error) => {
                        // A plain EOF is the peer hanging up, not a fault
                        if error.kind() != std::io::ErrorKind::UnexpectedEof {
                            warn!(channel_id = %channel.id, %error, "channel read failed");
                        }
                        break;
                    }
                },
                _ = closed.changed() => break,
            }
        }
        channel.finish_close(&event_bus);
    }

    async fn route_inbound(self: &Arc<Self>, packet: Packet) {
        if packet.response {
            if !self.queries.complete(packet) {
                debug!(channel_id = %self.id, "discarding response for a retired query");
            }
            return;
        }

        let handled = self.packet_registry.dispatch(self, &packet).await;
        if handled == 0 {
            debug!(
                channel_id = %self.id,
                channel = %packet.channel,
                "dropping packet without listeners"
            );
        }
    }

    /// Runs exactly once, from the read loop's exit path.
    fn finish_close(&self, event_bus: &EventBus) {
        self.closed.send_replace(true);
        self.queries.retire_all();
        debug!(
            channel_id = %self.id,
            remote = %self.remote_address,
            "network channel closed"
        );
        event_bus.publish(&ChannelCloseEvent {
            channel_id: self.id,
            remote_address: self.remote_address.clone(),
            server_channel: self.server_channel,
        });
    }

    /// Two channels talking to each other over a real localhost socket.
    #[cfg(test)]
    pub(crate) async fn loopback_pair() -> (Arc<NetworkChannel>, Arc<NetworkChannel>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let (accepted, connected) =
            tokio::join!(listener.accept(), TcpStream::connect(address));
        let (server_stream, _) = accepted.unwrap();

        let event_bus = Arc::new(EventBus::new());
        let server = NetworkChannel::launch(
            server_stream,
            true,
            Arc::new(PacketListenerRegistry::new()),
            event_bus.clone(),
        );
        let client = NetworkChannel::launch(
            connected.unwrap(),
            false,
            Arc::new(PacketListenerRegistry::new()),
            event_bus,
        );
        (client, server)
    }
}
