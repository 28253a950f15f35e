//! Armada Auth - users, tokens and permissions
//!
//! This crate provides:
//! - The in-memory user store with bcrypt credential verification
//! - JWT access token issuing and cached validation
//! - Wildcard permission matching with a cached check
//! - The `AuthService` facade the HTTP middleware and RPC guard build on

pub mod model;
pub mod service;

// Re-export commonly used types
pub use model::{AuthContext, AuthResult, PermissionCheckResult, Session, User};
pub use service::AuthService;
