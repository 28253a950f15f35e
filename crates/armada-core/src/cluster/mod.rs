//! Cluster membership and head election

pub mod event;
pub mod registry;
pub mod sync;
