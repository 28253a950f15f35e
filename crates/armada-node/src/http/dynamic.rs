//! Adapter between actix-web and the dynamic handler registry
//!
//! Requests that match none of the built-in routes land here. The handler
//! registry resolves the most specific module-registered pattern; security
//! rules were already enforced by the middleware, which consults the same
//! pattern table.

use std::collections::HashMap;

use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use tracing::warn;

use armada_core::http::{HandlerRequest, HandlerResponse};

use crate::model::{AppState, response::Rejection};

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn into_http_response(response: HandlerResponse) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status)
        .content_type(response.content_type)
        .body(response.body)
}

pub async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    data: web::Data<AppState>,
) -> HttpResponse {
    let method = req.method().as_str();
    let path = req.path();

    let Some((handler, path_params)) = data.components.http_handler_registry.resolve(method, path)
    else {
        return Rejection::not_found("resource not found".to_string());
    };

    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let request = HandlerRequest {
        method: method.to_string(),
        path: path.to_string(),
        path_params,
        query: parse_query(req.query_string()),
        headers,
        body,
    };

    match handler.handle(request).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            warn!("dynamic handler for {} {} failed: {:#}", method, path, e);
            HttpResponse::InternalServerError().json(Rejection::new("handler failed"))
        }
    }
}
