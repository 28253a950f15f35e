//! Armada Core - Cluster coordination, network channels and RPC dispatch
//!
//! This crate provides:
//! - Node registry and head election
//! - The framed-TCP network channel layer and packet listener registries
//! - RPC dispatch (handler registry, senders, data-mapper bindings)
//! - The process event bus and the owner-scoped auxiliary registries
//!   (commands, data sync, dynamic HTTP handlers, security rules)

pub mod cluster;
pub mod command;
pub mod components;
pub mod event;
pub mod http;
pub mod network;
pub mod rpc;

// Re-export commonly used types
pub use cluster::registry::{NodeRegistry, NodeServer};
pub use components::ComponentRegistry;
pub use event::EventBus;
pub use network::{channel::NetworkChannel, client::NetworkClient, server::NetworkServer};
pub use rpc::{RpcError, mapper::DataMapperRegistry, sender::RpcFactory};
