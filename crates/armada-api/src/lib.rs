//! Armada API - shared data models
//!
//! This crate provides:
//! - Cluster node and snapshot models
//! - The packet model carried by network channels
//! - RPC request/response envelope models
//! - Module manifest models and dependency validation

pub mod model;
pub mod module;
pub mod packet;
pub mod rpc;

// Re-export commonly used types
pub use model::*;
