//! Armada node binary crate: the running control plane process
//!
//! Wires the cluster runtime, module host, auth service and REST API
//! into one process. The [`node::Node`] type carries the runtime; the
//! `startup` module holds configuration, logging and the HTTP server.

pub mod http;
pub mod middleware;
pub mod model;
pub mod module_handler;
pub mod node;
pub mod startup;

pub use model::AppState;
pub use node::{Node, NodeOptions};
pub use startup::Configuration;
