//! Cluster membership endpoints

use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use armada_api::model::{ClusterNode, NodeInfoSnapshot};
use armada_common::error::ArmadaError;
use armada_core::cluster::registry::NodeServer;

use crate::model::{AppState, response::Rejection};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeView {
    node: ClusterNode,
    available: bool,
    head: bool,
    snapshot: Option<NodeInfoSnapshot>,
}

impl NodeView {
    fn from_server(server: &NodeServer, head_id: &str) -> Self {
        Self {
            node: server.info(),
            available: server.available(),
            head: server.unique_id() == head_id,
            snapshot: server.snapshot(),
        }
    }
}

#[get("/cluster/nodes")]
async fn nodes(data: web::Data<AppState>) -> impl Responder {
    let registry = &data.components.node_registry;
    let head_id = registry.head_node().unique_id().to_string();

    let views: Vec<NodeView> = registry
        .node_servers()
        .iter()
        .map(|server| NodeView::from_server(server, &head_id))
        .collect();

    HttpResponse::Ok().json(views)
}

#[get("/cluster/nodes/available")]
async fn available_nodes(data: web::Data<AppState>) -> impl Responder {
    let registry = &data.components.node_registry;
    let head_id = registry.head_node().unique_id().to_string();

    let views: Vec<NodeView> = registry
        .available_nodes()
        .iter()
        .map(|server| NodeView::from_server(server, &head_id))
        .collect();

    HttpResponse::Ok().json(views)
}

#[get("/cluster/head")]
async fn head_node(data: web::Data<AppState>) -> impl Responder {
    let head = data.components.node_registry.head_node();
    HttpResponse::Ok().json(NodeView::from_server(&head, head.unique_id()))
}

#[get("/cluster/self")]
async fn local_node(data: web::Data<AppState>) -> impl Responder {
    let registry = &data.components.node_registry;
    let head_id = registry.head_node().unique_id().to_string();
    HttpResponse::Ok().json(NodeView::from_server(&registry.local_node(), &head_id))
}

/// Force a head re-election over the current membership snapshot
#[post("/cluster/refresh")]
async fn refresh_head(data: web::Data<AppState>) -> impl Responder {
    let head = data.components.node_registry.refresh_head_node();
    info!("head node refresh requested via API, head is '{}'", head.unique_id());

    HttpResponse::Ok().json(json!({
        "success": true,
        "headNodeId": head.unique_id(),
    }))
}

#[get("/cluster/nodes/{id}")]
async fn node_by_id(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let registry = &data.components.node_registry;

    match registry.node_server(&id) {
        Some(server) => {
            let head_id = registry.head_node().unique_id().to_string();
            HttpResponse::Ok().json(NodeView::from_server(&server, &head_id))
        }
        None => Rejection::not_found(ArmadaError::NodeNotExist(id).to_string()),
    }
}
