//! Events published by the cluster layer
//!
//! All of these go through the [`EventBus`](crate::event::EventBus) so that
//! any component (or loaded module) can observe membership churn without
//! holding a reference to the registry itself.

use armada_api::model::ClusterNode;
use uuid::Uuid;

/// A node was registered with the local membership view
#[derive(Clone, Debug)]
pub struct NodeJoinEvent {
    pub node: ClusterNode,
}

/// A node was removed from the local membership view
#[derive(Clone, Debug)]
pub struct NodeLeaveEvent {
    pub node_id: String,
}

/// A node flipped between available and unavailable
#[derive(Clone, Debug)]
pub struct NodeAvailabilityEvent {
    pub node_id: String,
    pub available: bool,
}

/// The head node changed after a refresh
#[derive(Clone, Debug)]
pub struct HeadNodeChangeEvent {
    pub previous_id: String,
    pub current_id: String,
}

/// A network channel finished its handshake and is usable
#[derive(Clone, Debug)]
pub struct ChannelOpenEvent {
    pub channel_id: Uuid,
    pub remote_address: String,
    pub server_channel: bool,
}

/// A network channel closed, either deliberately or by peer loss
#[derive(Clone, Debug)]
pub struct ChannelCloseEvent {
    pub channel_id: Uuid,
    pub remote_address: String,
    pub server_channel: bool,
}
