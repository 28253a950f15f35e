//! RPC envelope models
//!
//! An invocation names its target interface and method and carries every
//! argument as a (type name, JSON value) pair so the receiving side can run
//! it back through the data-mapper registry. Responses carry either a tagged
//! result or a structured failure; timeouts never cross the wire (they are
//! raised locally by the caller).

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One argument or result value, tagged with its mapper type name
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcValue {
    pub type_name: String,
    pub value: Value,
}

impl RpcValue {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Deserializes the tagged value into a concrete type
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }
}

/// A serialized method invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<RpcValue>,
    /// Bearer token of the caller, when the target handler requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl RpcRequest {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            arguments: Vec::new(),
            access_token: None,
        }
    }
}

/// Remote-reported failure kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcFailureKind {
    UnknownTarget,
    UnmappableType,
    ApplicationError,
}

impl RpcFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcFailureKind::UnknownTarget => "UNKNOWN_TARGET",
            RpcFailureKind::UnmappableType => "UNMAPPABLE_TYPE",
            RpcFailureKind::ApplicationError => "APPLICATION_ERROR",
        }
    }
}

impl Display for RpcFailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure carried in a response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcFailure {
    pub kind: RpcFailureKind,
    pub message: String,
}

/// Result of one invocation as sent back to the caller
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RpcFailure>,
}

impl RpcResponse {
    pub fn success(result: Option<RpcValue>) -> Self {
        Self {
            result,
            failure: None,
        }
    }

    pub fn failure(kind: RpcFailureKind, message: impl Into<String>) -> Self {
        Self {
            result: None,
            failure: Some(RpcFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}
