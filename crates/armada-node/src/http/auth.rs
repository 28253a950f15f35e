//! Login and session endpoints

use actix_web::{HttpMessage, HttpRequest, HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use armada_auth::model::{AuthContext, AuthResult, INVALID_CREDENTIAL_MESSAGE, User};

use crate::model::{AppState, response::Rejection};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResult {
    success: bool,
    username: String,
    access_token: String,
    token_ttl_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    username: Option<String>,
    password: Option<String>,
}

/// Credentials arrive either as an `Authorization: Basic` header (resolved
/// by the middleware, the security rule declares Basic optional) or as a
/// JSON body with username/password.
#[post("/auth/login")]
async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: Option<web::Json<LoginData>>,
) -> impl Responder {
    let basic_user = req
        .extensions()
        .get::<AuthContext>()
        .and_then(|context| context.user.clone());

    let session = match basic_user {
        Some(user) => data.auth_service.session_for(&user),
        None => {
            let (username, password) = match body.as_ref().map(|body| {
                (
                    body.username.clone().unwrap_or_default(),
                    body.password.clone().unwrap_or_default(),
                )
            }) {
                Some((username, password)) if !username.is_empty() && !password.is_empty() => {
                    (username, password)
                }
                _ => return Rejection::unauthorized(INVALID_CREDENTIAL_MESSAGE),
            };
            data.auth_service.login(&username, &password)
        }
    };

    match session {
        AuthResult::Succeeded(session) => HttpResponse::Ok().json(LoginResult {
            success: true,
            username: session.username,
            access_token: session.access_token,
            token_ttl_seconds: session.token_ttl_seconds,
        }),
        AuthResult::Failed { reason } => Rejection::unauthorized(&reason),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    username: String,
    permissions: Vec<String>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            permissions: user.permissions.into_iter().collect(),
        }
    }
}

/// Echo the account behind the presented token. Gated by a mandatory
/// Bearer rule, so an unresolved user here is a middleware bug.
#[get("/auth/me")]
async fn me(req: HttpRequest) -> impl Responder {
    let user = req
        .extensions()
        .get::<AuthContext>()
        .and_then(|context| context.user.clone());

    match user {
        Some(user) => HttpResponse::Ok().json(UserView::from(user)),
        None => Rejection::unauthorized(INVALID_CREDENTIAL_MESSAGE),
    }
}
