//! Actix-web middleware

pub mod auth;

pub use auth::Authentication;
