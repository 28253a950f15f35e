// Authentication middleware for Actix-web
// This middleware enforces the registered security rules and attaches the
// resolved authentication context to every request

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web::Data,
};

use futures::future::LocalBoxFuture;
use tracing::debug;

use armada_auth::{
    model::{
        ACCESS_TOKEN_HEADER, ACCESS_TOKEN_PARAM, AUTHORIZATION_HEADER, AuthContext, AuthResult,
        BEARER_PREFIX, INVALID_CREDENTIAL_MESSAGE, MISSING_PERMISSION_MESSAGE,
    },
    service::AuthService,
};
use armada_core::http::AuthKind;

use crate::model::{AppState, response::Rejection};

// Authentication middleware transformer
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthenticationMiddleware { service })
    }
}

pub struct AuthenticationMiddleware<S> {
    service: S,
}

/// Extract token from request using 3 sources in priority order:
/// 1. `accessToken` HTTP header
/// 2. `Authorization: Bearer <token>` header
/// 3. `accessToken` query parameter
fn extract_token(req: &ServiceRequest) -> Option<String> {
    // 1. accessToken header
    if let Some(header_val) = req.headers().get(ACCESS_TOKEN_HEADER)
        && let Ok(s) = header_val.to_str()
    {
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    // 2. Authorization: Bearer <token> header
    if let Some(header_val) = req.headers().get(AUTHORIZATION_HEADER)
        && let Ok(s) = header_val.to_str()
    {
        let trimmed = s.trim();
        if let Some(token) = trimmed.strip_prefix(BEARER_PREFIX) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    // 3. accessToken query parameter
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=')
                && key == ACCESS_TOKEN_PARAM
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// The raw `Authorization` header value, whatever its scheme.
///
/// Scheme validation happens in the auth service; a `Bearer` value sent to
/// a Basic entry point counts as presented-but-invalid credentials.
fn extract_authorization_header(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolve a bearer token into a context without enforcing anything.
///
/// Used for entry points with no security rule so handlers still see who
/// is calling when a valid token happens to be present.
fn best_effort_context(req: &ServiceRequest, auth_service: &AuthService) -> AuthContext {
    match extract_token(req) {
        Some(token) => match auth_service.authenticate_bearer(&token) {
            AuthResult::Succeeded(user) => AuthContext::authenticated(user, Some(token)),
            AuthResult::Failed { reason } => AuthContext::failed(reason),
        },
        None => AuthContext::anonymous(),
    }
}

enum Verdict {
    Forward(AuthContext),
    Reject(HttpResponse),
}

/// Evaluate the security rule matching this request.
///
/// Mandatory credentials that are missing or invalid reject with 401;
/// a missing required permission rejects with 403 and only ever after
/// authentication succeeded. The two cases are never merged.
fn authenticate(req: &ServiceRequest) -> Verdict {
    let Some(app_state) = req.app_data::<Data<AppState>>() else {
        tracing::error!("AppState not found in request app_data");
        return Verdict::Forward(AuthContext::anonymous());
    };
    let auth_service = &app_state.auth_service;

    let Some(rule) = app_state
        .components
        .security_registry
        .lookup(req.method().as_str(), req.path())
    else {
        return Verdict::Forward(best_effort_context(req, auth_service));
    };

    let context = match rule.auth {
        AuthKind::None => best_effort_context(req, auth_service),
        AuthKind::Basic { optional } => match extract_authorization_header(req) {
            Some(header_value) => match auth_service.authenticate_basic_header(&header_value) {
                AuthResult::Succeeded(user) => AuthContext::authenticated(user, None),
                AuthResult::Failed { reason } => {
                    if optional {
                        AuthContext::failed(reason)
                    } else {
                        return Verdict::Reject(Rejection::unauthorized(&reason));
                    }
                }
            },
            None => {
                if optional {
                    AuthContext::anonymous()
                } else {
                    return Verdict::Reject(Rejection::unauthorized(INVALID_CREDENTIAL_MESSAGE));
                }
            }
        },
        AuthKind::Bearer { optional } => match extract_token(req) {
            Some(token) => match auth_service.authenticate_bearer(&token) {
                AuthResult::Succeeded(user) => AuthContext::authenticated(user, Some(token)),
                AuthResult::Failed { reason } => {
                    if optional {
                        AuthContext::failed(reason)
                    } else {
                        return Verdict::Reject(Rejection::unauthorized(&reason));
                    }
                }
            },
            None => {
                if optional {
                    AuthContext::anonymous()
                } else {
                    return Verdict::Reject(Rejection::unauthorized(INVALID_CREDENTIAL_MESSAGE));
                }
            }
        },
    };

    if let Some(required) = rule.required_permission.as_deref() {
        // A permission check needs a resolved account; absent credentials
        // on a guarded entry point are still an authentication failure.
        let Some(user) = context.user.as_ref() else {
            return Verdict::Reject(Rejection::unauthorized(INVALID_CREDENTIAL_MESSAGE));
        };

        let check = auth_service.authorize(user, required);
        if !check.passed {
            debug!(
                "user '{}' denied {} {}: missing permission '{}'",
                user.username,
                req.method(),
                req.path(),
                required
            );
            return Verdict::Reject(Rejection::forbidden(MISSING_PERMISSION_MESSAGE));
        }
    }

    Verdict::Forward(context)
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if Method::OPTIONS != *req.method() {
            match authenticate(&req) {
                Verdict::Forward(context) => {
                    req.extensions_mut().insert(context);
                }
                Verdict::Reject(response) => {
                    return Box::pin(async move {
                        Ok(req.into_response(response).map_into_right_body())
                    });
                }
            }
        }

        let res = self.service.call(req);

        Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
    }
}
