//! Module lifecycle endpoints

use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Serialize;
use serde_json::json;

use armada_module::{ModuleError, ModuleWrapper};

use crate::model::{AppState, response::Rejection};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModuleView {
    group: String,
    name: String,
    version: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl From<&ModuleWrapper> for ModuleView {
    fn from(wrapper: &ModuleWrapper) -> Self {
        let descriptor = wrapper.descriptor();
        Self {
            group: descriptor.group.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            state: wrapper.state().to_string(),
            author: descriptor.author.clone(),
            description: descriptor.description.clone(),
        }
    }
}

fn error_response(error: ModuleError) -> HttpResponse {
    match error {
        ModuleError::Unknown { .. } => Rejection::not_found(error.to_string()),
        _ => Rejection::conflict(error.to_string()),
    }
}

#[get("/modules")]
async fn list_modules(data: web::Data<AppState>) -> impl Responder {
    let views: Vec<ModuleView> = data
        .module_provider
        .modules()
        .iter()
        .map(|wrapper| ModuleView::from(wrapper.as_ref()))
        .collect();

    HttpResponse::Ok().json(views)
}

#[post("/modules/{name}/stop")]
async fn stop_module(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.module_provider.stop_module(&name).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "module": name })),
        Err(error) => error_response(error),
    }
}

#[post("/modules/{name}/unload")]
async fn unload_module(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.module_provider.unload_module(&name).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "module": name })),
        Err(error) => error_response(error),
    }
}

#[get("/modules/{name}")]
async fn module_by_name(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.module_provider.module(&name) {
        Some(wrapper) => HttpResponse::Ok().json(ModuleView::from(wrapper.as_ref())),
        None => error_response(ModuleError::Unknown { module: name }),
    }
}
