//! RPC dispatch over network channels
//!
//! A call names a target interface and method; the sender ships it as a
//! query packet on the `rpc` channel and the dispatch listener on the
//! remote side runs it through the handler registry. Values cross the wire
//! tagged with data-mapper type names so both sides agree on their shape.

pub mod handler;
pub mod mapper;
pub mod sender;

use uuid::Uuid;

/// Everything that can go wrong with one remote call.
///
/// `Timeout` is raised locally by the caller; the other variants mirror
/// the failure document the remote side sent back.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("no handler registered for rpc target '{target}'")]
    UnknownTarget { target: String },

    #[error("rpc value mapping failed: {0}")]
    UnmappableType(String),

    #[error(
        "rpc call '{target}.{method}' timed out after {timeout_millis} ms (correlation id {correlation_id})"
    )]
    Timeout {
        target: String,
        method: String,
        timeout_millis: u64,
        correlation_id: Uuid,
    },

    #[error("remote handler for '{target}.{method}' failed: {message}")]
    RemoteApplication {
        target: String,
        method: String,
        message: String,
    },

    #[error("rpc transport failed: {0}")]
    Transport(String),
}
