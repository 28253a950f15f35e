//! Armada Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Armada
//! components:
//! - Error types
//! - Utility functions
//! - Common constants

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::ArmadaError;
pub use utils::is_valid;

/// Property key under which a node publishes its software version
pub const NODE_VERSION_KEY: &str = "version";
