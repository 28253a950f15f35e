//! Authentication services

pub mod permission;
pub mod token;
pub mod user;

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use jsonwebtoken::errors::ErrorKind;
use tracing::debug;

use crate::model::{
    AuthResult, BASIC_PREFIX, BEARER_PREFIX, INVALID_CREDENTIAL_MESSAGE,
    MISSING_PERMISSION_MESSAGE, PermissionCheckResult, Session, TOKEN_EXPIRED_MESSAGE, User,
};

use user::UserManager;

/// Facade over the user store, token service and permission checks.
///
/// Both the HTTP middleware and the RPC call guard authenticate through
/// this type, so Basic and Bearer credentials behave identically on
/// every entry point.
pub struct AuthService {
    users: Arc<UserManager>,
    secret_key: String,
    token_ttl_seconds: i64,
}

impl AuthService {
    /// `secret_key` is the base64-encoded JWT signing secret.
    pub fn new(secret_key: String, token_ttl_seconds: i64) -> Self {
        Self {
            users: Arc::new(UserManager::new()),
            secret_key,
            token_ttl_seconds,
        }
    }

    pub fn users(&self) -> &Arc<UserManager> {
        &self.users
    }

    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    /// Verify a username/password pair and issue an access token.
    pub fn login(&self, username: &str, password: &str) -> AuthResult<Session> {
        match self.users.authenticate(username, password) {
            AuthResult::Succeeded(user) => self.session_for(&user),
            AuthResult::Failed { reason } => AuthResult::Failed { reason },
        }
    }

    /// Issue an access token for an already-verified account.
    ///
    /// The Basic-authenticated login path lands here; the middleware has
    /// already checked the password.
    pub fn session_for(&self, user: &User) -> AuthResult<Session> {
        match token::encode_jwt_token(&user.username, &self.secret_key, self.token_ttl_seconds) {
            Ok(access_token) => AuthResult::Succeeded(Session {
                username: user.username.clone(),
                access_token,
                token_ttl_seconds: self.token_ttl_seconds,
            }),
            Err(e) => {
                debug!("failed to issue access token for '{}': {}", user.username, e);
                AuthResult::failed(INVALID_CREDENTIAL_MESSAGE)
            }
        }
    }

    pub fn authenticate_basic(&self, username: &str, password: &str) -> AuthResult<User> {
        self.users.authenticate(username, password)
    }

    /// Verify an `Authorization: Basic <base64>` header value.
    pub fn authenticate_basic_header(&self, header_value: &str) -> AuthResult<User> {
        let Some(encoded) = header_value.strip_prefix(BASIC_PREFIX) else {
            return AuthResult::failed(INVALID_CREDENTIAL_MESSAGE);
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return AuthResult::failed(INVALID_CREDENTIAL_MESSAGE);
        };
        let Ok(credentials) = String::from_utf8(decoded) else {
            return AuthResult::failed(INVALID_CREDENTIAL_MESSAGE);
        };
        let Some((username, password)) = credentials.split_once(':') else {
            return AuthResult::failed(INVALID_CREDENTIAL_MESSAGE);
        };

        self.authenticate_basic(username, password)
    }

    /// Verify a bearer access token and resolve the account behind it.
    ///
    /// Accepts the raw token or a full `Bearer ...` header value.
    pub fn authenticate_bearer(&self, access_token: &str) -> AuthResult<User> {
        let token = access_token
            .strip_prefix(BEARER_PREFIX)
            .unwrap_or(access_token);

        let data = match token::decode_jwt_token_cached(token, &self.secret_key) {
            Ok(data) => data,
            Err(e) => {
                return match e.kind() {
                    ErrorKind::ExpiredSignature => AuthResult::failed(TOKEN_EXPIRED_MESSAGE),
                    _ => AuthResult::failed(INVALID_CREDENTIAL_MESSAGE),
                };
            }
        };

        match self.users.user(&data.claims.sub) {
            Some(user) => AuthResult::Succeeded(user),
            None => {
                // The account was deleted after the token was issued
                token::invalidate_token(token);
                AuthResult::failed(INVALID_CREDENTIAL_MESSAGE)
            }
        }
    }

    /// Check that `user` holds `required_permission`.
    pub fn authorize(&self, user: &User, required_permission: &str) -> PermissionCheckResult {
        let passed = permission::check_permission_cached(
            &user.username,
            &user.permissions,
            required_permission,
        );

        if passed {
            PermissionCheckResult::pass()
        } else {
            PermissionCheckResult::deny(MISSING_PERMISSION_MESSAGE)
        }
    }
}
