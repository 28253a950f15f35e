//! Caller side of the RPC layer
//!
//! A factory hands out senders bound to one target interface; a sender
//! builds invocations that encode their arguments through the data mapper
//! at build time, so an unbindable value fails before anything crosses the
//! wire. Firing an invocation is one query round trip with the configured
//! timeout.

use std::{sync::Arc, time::Duration};

use armada_api::{
    packet::{CHANNEL_RPC, Packet},
    rpc::{RpcFailureKind, RpcRequest, RpcResponse, RpcValue},
};
use serde::{Serialize, de::DeserializeOwned};

use super::{RpcError, mapper::DataMapperRegistry};
use crate::network::{channel::NetworkChannel, query::QueryError};

/// Builds senders sharing one mapper registry and default timeout
pub struct RpcFactory {
    mappers: Arc<DataMapperRegistry>,
    default_timeout: Duration,
}

impl RpcFactory {
    pub fn new(mappers: Arc<DataMapperRegistry>, default_timeout: Duration) -> Self {
        Self {
            mappers,
            default_timeout,
        }
    }

    pub fn mappers(&self) -> &Arc<DataMapperRegistry> {
        &self.mappers
    }

    /// A sender addressing `target` on whatever channel each call is
    /// fired at.
    pub fn sender(&self, target: impl Into<String>) -> RpcSender {
        RpcSender {
            target: target.into(),
            mappers: self.mappers.clone(),
            timeout: self.default_timeout,
            access_token: None,
        }
    }
}

/// Caller handle for one target interface
#[derive(Clone)]
pub struct RpcSender {
    target: String,
    mappers: Arc<DataMapperRegistry>,
    timeout: Duration,
    access_token: Option<String>,
}

impl RpcSender {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token forwarded with every call, for permission-guarded targets.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn invoke(&self, method: impl Into<String>) -> RpcInvocation {
        let mut request = RpcRequest::new(self.target.clone(), method);
        request.access_token = self.access_token.clone();
        RpcInvocation {
            mappers: self.mappers.clone(),
            timeout: self.timeout,
            request,
            encode_error: None,
        }
    }
}

/// One call under construction
pub struct RpcInvocation {
    mappers: Arc<DataMapperRegistry>,
    timeout: Duration,
    request: RpcRequest,
    encode_error: Option<RpcError>,
}

impl RpcInvocation {
    /// Append an argument, encoded through the mapper. The first encoding
    /// failure sticks and surfaces when the invocation fires.
    pub fn arg<T: Serialize>(mut self, type_name: &str, value: &T) -> Self {
        if self.encode_error.is_some() {
            return self;
        }
        match self.mappers.encode(type_name, value) {
            Ok(encoded) => self.request.arguments.push(encoded),
            Err(error) => self.encode_error = Some(error),
        }
        self
    }

    /// Fire the call on `channel` and wait for its outcome.
    pub async fn fire(self, channel: &NetworkChannel) -> Result<Option<RpcValue>, RpcError> {
        if let Some(error) = self.encode_error {
            return Err(error);
        }

        let target = self.request.target.clone();
        let method = self.request.method.clone();

        let packet = Packet::json(CHANNEL_RPC, &self.request)
            .map_err(|error| RpcError::Transport(error.to_string()))?;
        let correlation_id = packet.correlation_id;

        let response = match channel.query(packet, self.timeout).await {
            Ok(response) => response,
            Err(QueryError::Timeout { timeout_millis, .. }) => {
                return Err(RpcError::Timeout {
                    target,
                    method,
                    timeout_millis,
                    correlation_id,
                });
            }
            Err(QueryError::ChannelClosed { .. }) => {
                return Err(RpcError::Transport(format!(
                    "channel closed during call '{}.{}'",
                    target, method
                )));
            }
        };

        let response: RpcResponse = response
            .body_as()
            .map_err(|error| RpcError::Transport(error.to_string()))?;

        match response.failure {
            None => Ok(response.result),
            Some(failure) => Err(match failure.kind {
                RpcFailureKind::UnknownTarget => RpcError::UnknownTarget { target },
                RpcFailureKind::UnmappableType => RpcError::UnmappableType(failure.message),
                RpcFailureKind::ApplicationError => RpcError::RemoteApplication {
                    target,
                    method,
                    message: failure.message,
                },
            }),
        }
    }

    /// Fire the call and decode its result into `T`. A call that returned
    /// nothing, or whose result does not fit `T`, is a mapping failure.
    pub async fn fire_as<T: DeserializeOwned>(self, channel: &NetworkChannel) -> Result<T, RpcError> {
        let method = format!("{}.{}", self.request.target, self.request.method);

        let Some(result) = self.fire(channel).await? else {
            return Err(RpcError::UnmappableType(format!(
                "call '{}' returned no result to decode",
                method
            )));
        };
        result.decode().map_err(|error| {
            RpcError::UnmappableType(format!(
                "result of '{}' does not fit the expected type: {}",
                method, error
            ))
        })
    }
}
