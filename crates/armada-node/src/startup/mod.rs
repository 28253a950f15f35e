//! Process startup: configuration, logging and the REST server

pub mod config;
pub mod http;
pub mod logging;

pub use config::Configuration;
pub use http::http_server;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
