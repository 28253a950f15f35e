//! The packet model carried by network channels
//!
//! A packet is the unit of traffic between two connected processes: a
//! logical channel name selecting the listeners it is dispatched to, a
//! correlation id pairing queries with their responses, and an opaque
//! payload. Payload bytes ride the JSON frame base64-encoded so frames stay
//! printable for wire-level debugging.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{ClusterNode, NodeInfoSnapshot};

// Reserved channel names used by the control plane itself
pub const CHANNEL_CLUSTER_HELLO: &str = "cluster-node-hello";
pub const CHANNEL_CLUSTER_SNAPSHOT: &str = "cluster-node-snapshot";
pub const CHANNEL_CLUSTER_DATA_SYNC: &str = "cluster-data-sync";
pub const CHANNEL_RPC: &str = "rpc";

/// One unit of traffic on a network channel.
///
/// The correlation id round-trips unchanged: a response packet carries the
/// id of the query it answers, which is how the query manager pairs them.
/// Response packets are consumed by the query manager and never reach
/// packet listeners; a response whose correlation id has already been
/// retired is discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub channel: String,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub response: bool,
    #[serde(with = "base64_bytes")]
    pub body: Bytes,
}

impl Packet {
    pub fn new(channel: impl Into<String>, body: Bytes) -> Self {
        Self {
            channel: channel.into(),
            correlation_id: Uuid::new_v4(),
            response: false,
            body,
        }
    }

    /// Build a packet whose body is the JSON encoding of `value`.
    pub fn json(channel: impl Into<String>, value: &impl Serialize) -> Result<Self, PacketError> {
        let body = serde_json::to_vec(value).map_err(PacketError::Encode)?;
        Ok(Self::new(channel, Bytes::from(body)))
    }

    /// Build a response to `query`, keeping its channel and correlation id.
    pub fn response(query: &Packet, body: Bytes) -> Self {
        Self {
            channel: query.channel.clone(),
            correlation_id: query.correlation_id,
            response: true,
            body,
        }
    }

    /// Build a JSON-bodied response to `query`.
    pub fn json_response(query: &Packet, value: &impl Serialize) -> Result<Self, PacketError> {
        let body = serde_json::to_vec(value).map_err(PacketError::Encode)?;
        Ok(Self::response(query, Bytes::from(body)))
    }

    /// Decode the body as JSON into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, PacketError> {
        serde_json::from_slice(&self.body).map_err(PacketError::Decode)
    }
}

/// Packet body encoding/decoding failures
#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("failed to encode packet body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode packet body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Body of a hello query on `cluster-node-hello`, and of its response.
///
/// The dialing side sends its own identity and snapshot as a query; the
/// accepting side answers with the same document describing itself. After
/// one round trip both ends know each other.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHello {
    pub node: ClusterNode,
    pub snapshot: NodeInfoSnapshot,
}

/// Body of a periodic broadcast on `cluster-node-snapshot`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshotUpdate {
    pub node_id: String,
    pub snapshot: NodeInfoSnapshot,
}

/// One named state document on `cluster-data-sync`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub name: String,
    pub data: Value,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
