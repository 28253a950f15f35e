//! Error types for Armada
//!
//! `ArmadaError` carries the domain failures shared across crates; subsystem
//! crates define their own enums next to the code that raises them.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum ArmadaError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("user '{0}' not exist!")]
    UserNotExist(String),

    #[error("node '{0}' not exist")]
    NodeNotExist(String),
}
