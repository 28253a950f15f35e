//! Main entry point for the Armada node.
//!
//! Boots configuration and logging, starts the cluster runtime and
//! serves the REST API until a shutdown signal arrives.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{error, info, warn};

use armada_auth::service::AuthService;
use armada_node::{
    model::AppState,
    node::{Node, NodeOptions},
    startup::{self, Configuration},
};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize configuration and logging
    let configuration = Configuration::new();
    let logging_config = configuration.logging_config();
    let _logging_guard = startup::init_logging(&logging_config)?;

    // Extract configuration parameters
    let http_host = configuration.http_host();
    let http_port = configuration.http_port();
    let admin_username = configuration.admin_username();
    let admin_password = configuration.admin_password();
    let token_ttl_seconds = configuration.token_ttl_seconds();

    let secret_key = match configuration.token_secret_key() {
        Some(secret) => secret,
        None => {
            let raw: [u8; 32] = rand::random();
            warn!("no token secret key configured, using a generated one; issued tokens will not survive a restart");
            STANDARD.encode(raw)
        }
    };

    // Set up authentication and the administrator account
    let auth_service = Arc::new(AuthService::new(secret_key, token_ttl_seconds));
    if let Some(generated) = auth_service
        .users()
        .ensure_default_admin(&admin_username, admin_password.as_deref())?
    {
        // Printed exactly once, the hash is not recoverable afterwards
        info!(
            "generated password for administrator account '{}': {}",
            admin_username, generated
        );
    }

    let options = NodeOptions {
        node_id: configuration.node_id(),
        cluster_listener: configuration.cluster_listener(),
        peers: configuration.peers(),
        rpc_timeout_millis: configuration.rpc_timeout_millis(),
        connect_timeout_millis: configuration.connect_timeout_millis(),
        snapshot_interval_millis: configuration.snapshot_interval_millis(),
    };
    if configuration.standalone() {
        info!("starting node '{}' in standalone mode", options.node_id);
    } else {
        info!(
            "starting node '{}' in cluster mode with {} configured peers",
            options.node_id,
            options.peers.len()
        );
    }

    // Start the cluster runtime
    let node = Node::new(options, auth_service.clone())?;
    node.start().await?;

    // Create application state and start the REST API
    let app_state = Arc::new(AppState {
        configuration,
        components: node.components().clone(),
        auth_service,
        module_provider: node.module_provider().clone(),
    });

    info!("starting REST API on {}:{}", http_host, http_port);
    let server = startup::http_server(app_state, http_host, http_port)?;

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("REST API server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    node.stop().await;
    info!("armada node shutdown complete");
    Ok(())
}
