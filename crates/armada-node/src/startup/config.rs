//! Configuration management for the Armada node
//!
//! This module handles loading and accessing application configuration.

use clap::Parser;
use config::{Config, Environment};
use tracing::warn;

use armada_api::model::{
    DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_HTTP_PORT, DEFAULT_NODE_PORT, DEFAULT_RPC_TIMEOUT_MILLIS,
    DEFAULT_SNAPSHOT_INTERVAL_MILLIS, HostAndPort,
};
use armada_auth::model::{DEFAULT_ADMIN_USERNAME, DEFAULT_TOKEN_EXPIRE_SECONDS};

use super::logging::LoggingConfig;

// Property names, matching the conf/application.yaml layout
const NODE_ID_PROPERTY: &str = "armada.node.id";
const CLUSTER_HOST_PROPERTY: &str = "armada.cluster.host";
const CLUSTER_PORT_PROPERTY: &str = "armada.cluster.port";
const CLUSTER_PEERS_PROPERTY: &str = "armada.cluster.peers";
const STANDALONE_PROPERTY: &str = "armada.cluster.standalone";
const HTTP_HOST_PROPERTY: &str = "armada.http.host";
const HTTP_PORT_PROPERTY: &str = "armada.http.port";
const RPC_TIMEOUT_PROPERTY: &str = "armada.rpc.timeoutMillis";
const CONNECT_TIMEOUT_PROPERTY: &str = "armada.cluster.connectTimeoutMillis";
const SNAPSHOT_INTERVAL_PROPERTY: &str = "armada.cluster.snapshotIntervalMillis";
const TOKEN_SECRET_KEY_PROPERTY: &str = "armada.auth.token.secretKey";
const TOKEN_TTL_PROPERTY: &str = "armada.auth.token.ttlSeconds";
const ADMIN_USERNAME_PROPERTY: &str = "armada.auth.admin.username";
const ADMIN_PASSWORD_PROPERTY: &str = "armada.auth.admin.password";
const LOGS_PATH_PROPERTY: &str = "armada.logs.path";
const LOGS_CONSOLE_PROPERTY: &str = "armada.logs.console";
const LOGS_FILE_PROPERTY: &str = "armada.logs.file";
const LOGS_LEVEL_PROPERTY: &str = "armada.logs.level";

const DEFAULT_NODE_ID: &str = "Node-1";
const DEFAULT_CONFIG_FILE: &str = "conf/application";

/// Command line arguments for the node
#[derive(Debug, Parser)]
#[command()]
struct Cli {
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,
    #[arg(short = 'n', long = "node-id")]
    node_id: Option<String>,
    #[arg(long = "standalone")]
    standalone: bool,
    #[arg(long = "peers", env = "ARMADA_PEERS")]
    peers: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> Self {
        let args = Cli::parse();
        let config_file = args
            .config_file
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let mut config_builder = Config::builder()
            .add_source(
                Environment::with_prefix("armada")
                    .separator(".")
                    .try_parsing(true),
            )
            .add_source(config::File::with_name(&config_file).required(false));

        if let Some(v) = args.node_id {
            config_builder = config_builder
                .set_override(NODE_ID_PROPERTY, v)
                .expect("Failed to set node id override");
        }
        if args.standalone {
            config_builder = config_builder
                .set_override(STANDALONE_PROPERTY, true)
                .expect("Failed to set standalone mode override");
        }
        if let Some(v) = args.peers {
            config_builder = config_builder
                .set_override(CLUSTER_PEERS_PROPERTY, v)
                .expect("Failed to set cluster peers override");
        }

        let app_config = config_builder
            .build()
            .expect("Failed to build configuration - check conf/application.yaml");

        Configuration { config: app_config }
    }

    // ========================================================================
    // Node identity and cluster listener
    // ========================================================================

    pub fn node_id(&self) -> String {
        self.config
            .get_string(NODE_ID_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_NODE_ID.to_string())
    }

    pub fn cluster_host(&self) -> String {
        self.config
            .get_string(CLUSTER_HOST_PROPERTY)
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }

    pub fn cluster_port(&self) -> u16 {
        self.config
            .get_int(CLUSTER_PORT_PROPERTY)
            .unwrap_or(DEFAULT_NODE_PORT as i64) as u16
    }

    pub fn cluster_listener(&self) -> HostAndPort {
        HostAndPort::new(self.cluster_host(), self.cluster_port())
    }

    pub fn standalone(&self) -> bool {
        self.config.get_bool(STANDALONE_PROPERTY).unwrap_or(false)
    }

    /// Peer listeners to dial at startup, comma separated `host:port` entries.
    ///
    /// Standalone mode ignores the peer list entirely; entries that do not
    /// parse are logged and skipped rather than aborting startup.
    pub fn peers(&self) -> Vec<HostAndPort> {
        if self.standalone() {
            return Vec::new();
        }

        self.config
            .get_string(CLUSTER_PEERS_PROPERTY)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| match entry.parse::<HostAndPort>() {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!("ignoring unparseable cluster peer '{}': {}", entry, e);
                    None
                }
            })
            .collect()
    }

    // ========================================================================
    // HTTP server
    // ========================================================================

    pub fn http_host(&self) -> String {
        self.config
            .get_string(HTTP_HOST_PROPERTY)
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }

    pub fn http_port(&self) -> u16 {
        self.config
            .get_int(HTTP_PORT_PROPERTY)
            .unwrap_or(DEFAULT_HTTP_PORT as i64) as u16
    }

    // ========================================================================
    // Timeouts and intervals
    // ========================================================================

    pub fn rpc_timeout_millis(&self) -> u64 {
        self.config
            .get_int(RPC_TIMEOUT_PROPERTY)
            .unwrap_or(DEFAULT_RPC_TIMEOUT_MILLIS as i64) as u64
    }

    pub fn connect_timeout_millis(&self) -> u64 {
        self.config
            .get_int(CONNECT_TIMEOUT_PROPERTY)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MILLIS as i64) as u64
    }

    pub fn snapshot_interval_millis(&self) -> u64 {
        self.config
            .get_int(SNAPSHOT_INTERVAL_PROPERTY)
            .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_MILLIS as i64) as u64
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Base64 encoded JWT signing key. When unset the node generates a
    /// random one at startup, which invalidates tokens across restarts.
    pub fn token_secret_key(&self) -> Option<String> {
        self.config
            .get_string(TOKEN_SECRET_KEY_PROPERTY)
            .ok()
            .filter(|key| !key.is_empty())
    }

    pub fn token_ttl_seconds(&self) -> i64 {
        self.config
            .get_int(TOKEN_TTL_PROPERTY)
            .unwrap_or(DEFAULT_TOKEN_EXPIRE_SECONDS)
    }

    pub fn admin_username(&self) -> String {
        self.config
            .get_string(ADMIN_USERNAME_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_ADMIN_USERNAME.to_string())
    }

    pub fn admin_password(&self) -> Option<String> {
        self.config
            .get_string(ADMIN_PASSWORD_PROPERTY)
            .ok()
            .filter(|password| !password.is_empty())
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOGS_PATH_PROPERTY).ok(),
            self.config.get_bool(LOGS_CONSOLE_PROPERTY).unwrap_or(true),
            self.config.get_bool(LOGS_FILE_PROPERTY).unwrap_or(true),
            self.config
                .get_string(LOGS_LEVEL_PROPERTY)
                .unwrap_or_else(|_| "info".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(pairs: &[(&str, &str)]) -> Configuration {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder
                .set_override(key.to_string(), value.to_string())
                .unwrap();
        }
        Configuration {
            config: builder.build().unwrap(),
        }
    }

    #[test]
    fn test_defaults_without_any_source() {
        let configuration = configuration(&[]);

        assert_eq!(configuration.node_id(), "Node-1");
        assert_eq!(configuration.cluster_port(), DEFAULT_NODE_PORT);
        assert_eq!(configuration.http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(configuration.token_ttl_seconds(), DEFAULT_TOKEN_EXPIRE_SECONDS);
        assert!(configuration.peers().is_empty());
        assert!(configuration.token_secret_key().is_none());
    }

    #[test]
    fn test_peer_list_parsing_skips_bad_entries() {
        let configuration = configuration(&[(
            CLUSTER_PEERS_PROPERTY,
            "10.0.0.1:1410, 10.0.0.2:1410,not-a-listener, ",
        )]);

        let peers = configuration.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], HostAndPort::new("10.0.0.1", 1410));
        assert_eq!(peers[1], HostAndPort::new("10.0.0.2", 1410));
    }

    #[test]
    fn test_standalone_ignores_peers() {
        let configuration = configuration(&[
            (CLUSTER_PEERS_PROPERTY, "10.0.0.1:1410"),
            (STANDALONE_PROPERTY, "true"),
        ]);

        assert!(configuration.standalone());
        assert!(configuration.peers().is_empty());
    }
}
