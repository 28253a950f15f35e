//! Authentication and authorization models
//!
//! This file defines data structures for users, sessions, JWT payloads and
//! the per-request authentication context.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// Credential transport
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const ACCESS_TOKEN_HEADER: &str = "accessToken";
pub const ACCESS_TOKEN_PARAM: &str = "accessToken";
pub const BEARER_PREFIX: &str = "Bearer ";
pub const BASIC_PREFIX: &str = "Basic ";

// Defaults
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_TOKEN_EXPIRE_SECONDS: i64 = 18000;
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

/// bcrypt truncates beyond this; longer passwords are rejected outright
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Permission granting everything
pub const GLOBAL_PERMISSION: &str = "*";

// Rejection reasons shared by the HTTP middleware and the RPC guard
pub const TOKEN_EXPIRED_MESSAGE: &str = "token expired!";
pub const INVALID_CREDENTIAL_MESSAGE: &str = "Authentication credentials are missing or invalid";
pub const MISSING_PERMISSION_MESSAGE: &str = "Missing required permission";

/// One account, with its bcrypt password hash and held permissions.
///
/// Serialized in full for node-to-node state sync; REST responses use
/// dedicated models that leave the hash out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl User {
    pub fn has_permission(&self, required: &str) -> bool {
        crate::service::permission::has_permission(&self.permissions, required)
    }
}

/// Claims carried by an access token
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwtPayload {
    pub sub: String,
    pub exp: i64,
}

/// Result of a successful login
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub access_token: String,
    pub token_ttl_seconds: i64,
}

/// Outcome of one credential verification
#[derive(Clone, Debug)]
pub enum AuthResult<T> {
    Succeeded(T),
    Failed { reason: String },
}

impl<T> AuthResult<T> {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Succeeded(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// Authentication state attached to a request by the middleware.
///
/// An entry point with optional authentication can see `user: None`
/// together with no error; a populated `auth_error` means credentials
/// were presented and rejected.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub user: Option<User>,
    pub token: Option<String>,
    pub auth_error: Option<String>,
}

impl AuthContext {
    pub fn authenticated(user: User, token: Option<String>) -> Self {
        Self {
            user: Some(user),
            token,
            auth_error: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            user: None,
            token: None,
            auth_error: Some(reason.into()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.username.as_str())
    }
}

/// Verdict of a permission check
#[derive(Clone, Debug)]
pub struct PermissionCheckResult {
    pub passed: bool,
    pub message: Option<String>,
}

impl PermissionCheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    pub fn deny(message: &str) -> Self {
        Self {
            passed: false,
            message: Some(message.to_string()),
        }
    }
}
