//! REST API under `/api/v1`
//!
//! Built-in endpoints are plain actix handlers; everything a module
//! registers at runtime goes through the dynamic handler adapter instead
//! (see [`dynamic`]).

pub mod auth;
pub mod cluster;
pub mod dynamic;
pub mod modules;

use actix_web::{Scope, web};

pub fn routes() -> Scope {
    web::scope("/api/v1")
        .service(auth::login)
        .service(auth::me)
        .service(cluster::nodes)
        // register before the `{id}` matcher
        .service(cluster::available_nodes)
        .service(cluster::head_node)
        .service(cluster::local_node)
        .service(cluster::refresh_head)
        .service(cluster::node_by_id)
        .service(modules::list_modules)
        .service(modules::stop_module)
        .service(modules::unload_module)
        .service(modules::module_by_name)
}
