//! Armada Module - feature module lifecycle
//!
//! This crate provides:
//! - The `Module` trait feature modules implement
//! - The `ModuleProvider` driving `Created → Loaded → Started → Stopped →
//!   Unloaded` with dependency resolution
//! - The `ModuleProviderHandler` hook points the node uses to tear down
//!   everything a stopped module registered

pub mod module;
pub mod provider;
pub mod wrapper;

// Re-export commonly used types
pub use module::{Module, ModuleContext, ModuleLifecycleEvent};
pub use provider::{ModuleError, ModuleProvider, ModuleProviderHandler};
pub use wrapper::ModuleWrapper;
