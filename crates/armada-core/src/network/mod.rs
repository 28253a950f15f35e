//! Framed-TCP network channel layer

pub mod channel;
pub mod client;
pub mod codec;
pub mod query;
pub mod registry;
pub mod server;
