//! REST server setup

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use crate::{http as api, middleware::Authentication, model::AppState};

/// Creates and binds the REST API server.
///
/// Routes registered by modules at runtime are served by the default
/// handler, which resolves them against the dynamic handler registry.
pub fn http_server(
    app_state: Arc<AppState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Authentication)
            .app_data(web::Data::from(app_state.clone()))
            .service(api::routes())
            .default_service(web::route().to(api::dynamic::dispatch))
    })
    .bind((address, port))?
    .run())
}
