//! Common cluster models and constants
//!
//! This module defines shared constants, data structures, and enums
//! used across the control plane.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Default listener ports
pub const DEFAULT_NODE_PORT: u16 = 1410;
pub const DEFAULT_HTTP_PORT: u16 = 2812;

// Timeouts and intervals
pub const DEFAULT_RPC_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_SNAPSHOT_INTERVAL_MILLIS: u64 = 1000;

// Snapshot property keys
pub const SNAPSHOT_VERSION_KEY: &str = "version";
pub const SNAPSHOT_MODULES_KEY: &str = "modules";

/// Opaque handle identifying which unit of code installed a registration.
///
/// Every registerable resource (packet listener, event listener, HTTP
/// handler, command, data-sync handler, mapper binding) is tagged with the
/// token of its owner at registration time; unloading the owner evicts all
/// entries carrying its token and no others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(uuid::Uuid);

impl OwnerToken {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Display for OwnerToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network listener address of a cluster participant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for HostAndPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid listener address: {}", s))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid listener port: {}", s))?;
        if host.is_empty() {
            return Err(format!("Invalid listener address: {}", s));
        }
        Ok(Self::new(host, port))
    }
}

/// Identity of a cluster participant as exchanged between nodes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub unique_id: String,
    pub listeners: Vec<HostAndPort>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl ClusterNode {
    pub fn new(unique_id: impl Into<String>, listeners: Vec<HostAndPort>) -> Self {
        Self {
            unique_id: unique_id.into(),
            listeners,
            properties: BTreeMap::new(),
        }
    }
}

/// Point-in-time state of one node, exchanged on every heartbeat.
///
/// Only `startup_millis` participates in coordination decisions; the
/// remaining fields are passthrough diagnostics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoSnapshot {
    pub creation_millis: i64,
    pub startup_millis: i64,
    pub used_memory: u64,
    pub max_memory: u64,
    pub cpu_usage: f64,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl NodeInfoSnapshot {
    pub fn new(startup_millis: i64) -> Self {
        Self {
            creation_millis: chrono::Utc::now().timestamp_millis(),
            startup_millis,
            ..Default::default()
        }
    }
}

/// Builder pattern for creating NodeInfoSnapshot instances
pub struct NodeInfoSnapshotBuilder {
    startup_millis: i64,
    used_memory: u64,
    max_memory: u64,
    cpu_usage: f64,
    properties: BTreeMap<String, Value>,
}

impl NodeInfoSnapshotBuilder {
    pub fn new(startup_millis: i64) -> Self {
        Self {
            startup_millis,
            used_memory: 0,
            max_memory: 0,
            cpu_usage: 0.0,
            properties: BTreeMap::new(),
        }
    }

    pub fn used_memory(mut self, used_memory: u64) -> Self {
        self.used_memory = used_memory;
        self
    }

    pub fn max_memory(mut self, max_memory: u64) -> Self {
        self.max_memory = max_memory;
        self
    }

    pub fn cpu_usage(mut self, cpu_usage: f64) -> Self {
        self.cpu_usage = cpu_usage;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn build(self) -> NodeInfoSnapshot {
        NodeInfoSnapshot {
            creation_millis: chrono::Utc::now().timestamp_millis(),
            startup_millis: self.startup_millis,
            used_memory: self.used_memory,
            max_memory: self.max_memory,
            cpu_usage: self.cpu_usage,
            properties: self.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_token_uniqueness() {
        assert_ne!(OwnerToken::random(), OwnerToken::random());
    }

    #[test]
    fn test_host_and_port_parse() {
        let listener: HostAndPort = "10.0.0.7:1410".parse().unwrap();
        assert_eq!(listener.host, "10.0.0.7");
        assert_eq!(listener.port, 1410);
        assert_eq!(listener.address(), "10.0.0.7:1410");

        assert!("no-port".parse::<HostAndPort>().is_err());
        assert!(":1410".parse::<HostAndPort>().is_err());
        assert!("host:notaport".parse::<HostAndPort>().is_err());
    }

    #[test]
    fn test_cluster_node_serde() {
        let node = ClusterNode::new("Node-1", vec![HostAndPort::new("127.0.0.1", 1410)]);
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"uniqueId\":\"Node-1\""));

        let parsed: ClusterNode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.unique_id, "Node-1");
        assert_eq!(parsed.listeners.len(), 1);
    }

    #[test]
    fn test_snapshot_builder() {
        let snapshot = NodeInfoSnapshotBuilder::new(1000)
            .used_memory(512)
            .max_memory(4096)
            .cpu_usage(12.5)
            .property("version", Value::from("0.1.0"))
            .build();
        assert_eq!(snapshot.startup_millis, 1000);
        assert_eq!(snapshot.max_memory, 4096);
        assert!(snapshot.creation_millis > 0);
        assert_eq!(snapshot.properties.get("version"), Some(&Value::from("0.1.0")));
    }
}
