//! Endpoint-level channel tests over real localhost sockets

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use armada_api::{
    model::{HostAndPort, OwnerToken},
    packet::Packet,
};
use armada_core::{
    EventBus, NetworkClient, NetworkServer,
    network::{
        channel::NetworkChannel,
        registry::{PacketDisposition, PacketListener},
    },
};
use async_trait::async_trait;
use bytes::Bytes;

struct CountingListener {
    hits: Arc<AtomicUsize>,
}

#[async_trait]
impl PacketListener for CountingListener {
    async fn handle(
        &self,
        _channel: &Arc<NetworkChannel>,
        _packet: &Packet,
    ) -> anyhow::Result<PacketDisposition> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(PacketDisposition::Continue)
    }
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", description);
}

async fn endpoints() -> (NetworkServer, NetworkClient) {
    let event_bus = Arc::new(EventBus::new());
    let server = NetworkServer::bind(&HostAndPort::new("127.0.0.1", 0), event_bus.clone())
        .await
        .unwrap();
    let client = NetworkClient::new(event_bus, Duration::from_secs(5));
    (server, client)
}

#[tokio::test]
async fn test_endpoint_listener_sees_traffic_from_every_channel() {
    let (server, client) = endpoints().await;
    let hits = Arc::new(AtomicUsize::new(0));
    server.packet_registry().add_listener(
        OwnerToken::random(),
        "status",
        Arc::new(CountingListener { hits: hits.clone() }),
    );

    let address = server.local_address();
    let target = HostAndPort::new("127.0.0.1", address.port());
    let first = client.connect(&target).await.unwrap();
    let second = client.connect(&target).await.unwrap();

    first.send(Packet::new("status", Bytes::new())).await.unwrap();
    second.send(Packet::new("status", Bytes::new())).await.unwrap();

    wait_until("both packets dispatched", || hits.load(Ordering::SeqCst) == 2).await;
    assert_eq!(server.channel_count(), 2);
    assert_eq!(client.channel_count(), 2);
}

#[tokio::test]
async fn test_broadcast_reaches_every_connected_client() {
    let (server, client) = endpoints().await;
    let hits = Arc::new(AtomicUsize::new(0));
    client.packet_registry().add_listener(
        OwnerToken::random(),
        "announce",
        Arc::new(CountingListener { hits: hits.clone() }),
    );

    let target = HostAndPort::new("127.0.0.1", server.local_address().port());
    client.connect(&target).await.unwrap();
    client.connect(&target).await.unwrap();
    wait_until("both channels accepted", || server.channel_count() == 2).await;

    server.broadcast(&Packet::new("announce", Bytes::new())).await;
    wait_until("broadcast delivered", || hits.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_channel_sets_prune_on_close() {
    let (server, client) = endpoints().await;
    let target = HostAndPort::new("127.0.0.1", server.local_address().port());
    let channel = client.connect(&target).await.unwrap();
    wait_until("channel accepted", || server.channel_count() == 1).await;

    assert!(!channel.is_server_channel());
    let accepted = server.channels().into_iter().next().unwrap();
    assert!(accepted.is_server_channel());

    channel.close();
    wait_until("both sides pruned", || {
        server.channel_count() == 0 && client.channel_count() == 0
    })
    .await;
}

#[tokio::test]
async fn test_server_close_drops_clients() {
    let (server, client) = endpoints().await;
    let target = HostAndPort::new("127.0.0.1", server.local_address().port());
    let channel = client.connect(&target).await.unwrap();

    server.close();
    channel.wait_closed().await;

    // The listener is gone as well
    let error = NetworkClient::new(Arc::new(EventBus::new()), Duration::from_millis(500))
        .connect(&target)
        .await;
    assert!(error.is_err());
}

#[tokio::test]
async fn test_owner_eviction_stops_delivery_without_reconnect() {
    let (server, client) = endpoints().await;
    let module = OwnerToken::random();
    let hits = Arc::new(AtomicUsize::new(0));
    server.packet_registry().add_listener(
        module,
        "status",
        Arc::new(CountingListener { hits: hits.clone() }),
    );

    let target = HostAndPort::new("127.0.0.1", server.local_address().port());
    let channel = client.connect(&target).await.unwrap();

    channel.send(Packet::new("status", Bytes::new())).await.unwrap();
    wait_until("first packet dispatched", || hits.load(Ordering::SeqCst) == 1).await;

    assert_eq!(server.packet_registry().remove_listeners(module), 1);
    channel.send(Packet::new("status", Bytes::new())).await.unwrap();

    // The second packet must not be delivered; give it time to arrive
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
