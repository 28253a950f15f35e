//! HTTP response types for the Armada node
//!
//! This module provides common response structures for API responses.

use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

/// Body returned for every rejected request.
///
/// RPC failures and security denials share this shape so callers can
/// check `success` without knowing which layer refused them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rejection {
    pub success: bool,
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: &str) -> HttpResponse {
        HttpResponse::Unauthorized().json(Rejection::new(reason))
    }

    pub fn forbidden(reason: &str) -> HttpResponse {
        HttpResponse::Forbidden().json(Rejection::new(reason))
    }

    pub fn not_found(reason: String) -> HttpResponse {
        HttpResponse::NotFound().json(Rejection::new(reason))
    }

    pub fn conflict(reason: String) -> HttpResponse {
        HttpResponse::Conflict().json(Rejection::new(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_wire_shape() {
        let json = serde_json::to_value(Rejection::new("token expired!")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "token expired!");
    }
}
