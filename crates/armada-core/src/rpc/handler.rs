//! RPC handler registry and inbound dispatch
//!
//! At most one handler is bound per target name; re-registering replaces
//! the previous handler, so callers relying on override semantics must
//! unregister first. The dispatch listener answers every well-formed
//! request within one round trip: an unknown target or unmappable value
//! comes back as a structured failure immediately instead of letting the
//! caller run into its timeout.

use std::sync::Arc;

use armada_api::{
    packet::Packet,
    rpc::{RpcFailureKind, RpcRequest, RpcResponse, RpcValue},
};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::mapper::DataMapperRegistry;
use crate::network::{
    channel::NetworkChannel,
    registry::{PacketDisposition, PacketListener},
};

/// Server side of one RPC target interface
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Target name callers address this handler by.
    fn target(&self) -> &str;

    /// Permission a remote caller must hold, when set. `None` means the
    /// target accepts unauthenticated calls.
    fn required_permission(&self) -> Option<&str> {
        None
    }

    async fn invoke(&self, method: &str, arguments: &[RpcValue])
    -> anyhow::Result<Option<RpcValue>>;
}

/// Target-name-keyed handler table
pub struct RpcHandlerRegistry {
    handlers: DashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Bind a handler to its target name, replacing any previous binding.
    pub fn register_handler(&self, handler: Arc<dyn RpcHandler>) {
        let target = handler.target().to_string();
        if self.handlers.insert(target.clone(), handler).is_some() {
            warn!(target = %target, "replaced existing rpc handler");
        } else {
            info!(target = %target, "registered rpc handler");
        }
    }

    pub fn unregister_handler(&self, target: &str) -> bool {
        let removed = self.handlers.remove(target).is_some();
        if removed {
            info!(target = %target, "unregistered rpc handler");
        }
        removed
    }

    pub fn handler(&self, target: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(target).map(|entry| entry.value().clone())
    }

    pub fn registered_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        targets.sort();
        targets
    }
}

impl Default for RpcHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Credential check applied before a permission-guarded handler runs.
/// Implemented outside this crate, where user storage lives.
pub trait RpcCallGuard: Send + Sync {
    /// `Ok(())` to run the call, `Err(reason)` to reject it.
    fn authorize(&self, access_token: Option<&str>, required_permission: &str)
    -> Result<(), String>;
}

/// Packet listener turning `rpc` channel queries into handler invocations
pub struct RpcDispatchListener {
    handlers: Arc<RpcHandlerRegistry>,
    mappers: Arc<DataMapperRegistry>,
    guard: Option<Arc<dyn RpcCallGuard>>,
}

impl RpcDispatchListener {
    pub fn new(handlers: Arc<RpcHandlerRegistry>, mappers: Arc<DataMapperRegistry>) -> Self {
        Self {
            handlers,
            mappers,
            guard: None,
        }
    }

    /// Install the credential check used for permission-guarded targets.
    pub fn with_guard(mut self, guard: Arc<dyn RpcCallGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    async fn dispatch(&self, packet: &Packet) -> RpcResponse {
        let request: RpcRequest = match packet.body_as() {
            Ok(request) => request,
            Err(error) => {
                return RpcResponse::failure(
                    RpcFailureKind::UnmappableType,
                    format!("malformed rpc request: {}", error),
                );
            }
        };

        let Some(handler) = self.handlers.handler(&request.target) else {
            debug!(target = %request.target, "rpc call for unknown target");
            return RpcResponse::failure(
                RpcFailureKind::UnknownTarget,
                format!("no handler registered for target '{}'", request.target),
            );
        };

        for argument in &request.arguments {
            if let Err(error) = self.mappers.check(&argument.type_name, &argument.value) {
                return RpcResponse::failure(RpcFailureKind::UnmappableType, error.to_string());
            }
        }

        // Permission-guarded targets fail closed without a guard installed
        if let Some(permission) = handler.required_permission() {
            let verdict = match &self.guard {
                Some(guard) => guard.authorize(request.access_token.as_deref(), permission),
                None => Err("no credential verifier is installed".to_string()),
            };
            if let Err(reason) = verdict {
                warn!(
                    target = %request.target,
                    method = %request.method,
                    reason = %reason,
                    "rejected rpc call"
                );
                return RpcResponse::failure(
                    RpcFailureKind::ApplicationError,
                    format!("authorization failed: {}", reason),
                );
            }
        }

        match handler.invoke(&request.method, &request.arguments).await {
            Ok(Some(result)) => {
                if let Err(error) = self.mappers.check(&result.type_name, &result.value) {
                    return RpcResponse::failure(RpcFailureKind::UnmappableType, error.to_string());
                }
                RpcResponse::success(Some(result))
            }
            Ok(None) => RpcResponse::success(None),
            Err(error) => {
                warn!(
                    target = %request.target,
                    method = %request.method,
                    error = %error,
                    "rpc handler failed"
                );
                RpcResponse::failure(RpcFailureKind::ApplicationError, error.to_string())
            }
        }
    }
}

#[async_trait]
impl PacketListener for RpcDispatchListener {
    async fn handle(
        &self,
        channel: &Arc<NetworkChannel>,
        packet: &Packet,
    ) -> anyhow::Result<PacketDisposition> {
        let response = self.dispatch(packet).await;
        channel.send(Packet::json_response(packet, &response)?).await?;
        Ok(PacketDisposition::Consume)
    }
}

#[cfg(test)]
mod tests {
    use armada_api::model::OwnerToken;
    use bytes::Bytes;
    use serde_json::Value;

    use super::*;

    struct UppercaseHandler;

    #[async_trait]
    impl RpcHandler for UppercaseHandler {
        fn target(&self) -> &str {
            "TextService"
        }

        async fn invoke(
            &self,
            method: &str,
            arguments: &[RpcValue],
        ) -> anyhow::Result<Option<RpcValue>> {
            match method {
                "uppercase" => {
                    let input: String = arguments[0].decode()?;
                    Ok(Some(RpcValue::new("string", Value::from(input.to_uppercase()))))
                }
                other => anyhow::bail!("no such method '{}'", other),
            }
        }
    }

    struct GuardedHandler;

    #[async_trait]
    impl RpcHandler for GuardedHandler {
        fn target(&self) -> &str {
            "NodeControl"
        }

        fn required_permission(&self) -> Option<&str> {
            Some("node.restart")
        }

        async fn invoke(
            &self,
            _method: &str,
            _arguments: &[RpcValue],
        ) -> anyhow::Result<Option<RpcValue>> {
            Ok(None)
        }
    }

    fn listener() -> RpcDispatchListener {
        let handlers = Arc::new(RpcHandlerRegistry::new());
        handlers.register_handler(Arc::new(UppercaseHandler));
        handlers.register_handler(Arc::new(GuardedHandler));

        let mappers = Arc::new(DataMapperRegistry::new());
        mappers.register_standard_bindings(OwnerToken::random());
        RpcDispatchListener::new(handlers, mappers)
    }

    fn request_packet(request: &RpcRequest) -> Packet {
        Packet::json("rpc", request).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let listener = listener();
        let mut request = RpcRequest::new("TextService", "uppercase");
        request
            .arguments
            .push(RpcValue::new("string", Value::from("armada")));

        let response = listener.dispatch(&request_packet(&request)).await;
        assert!(response.is_success());
        assert_eq!(
            response.result.unwrap().value,
            Value::from("ARMADA")
        );
    }

    #[tokio::test]
    async fn test_unknown_target_fails_fast() {
        let listener = listener();
        let request = RpcRequest::new("GhostService", "anything");

        let response = listener.dispatch(&request_packet(&request)).await;
        let failure = response.failure.unwrap();
        assert_eq!(failure.kind, RpcFailureKind::UnknownTarget);
        assert!(failure.message.contains("GhostService"));
    }

    #[tokio::test]
    async fn test_unbound_argument_type_fails() {
        let listener = listener();
        let mut request = RpcRequest::new("TextService", "uppercase");
        request
            .arguments
            .push(RpcValue::new("mysteryType", Value::from("x")));

        let response = listener.dispatch(&request_packet(&request)).await;
        assert_eq!(
            response.failure.unwrap().kind,
            RpcFailureKind::UnmappableType
        );
    }

    #[tokio::test]
    async fn test_handler_error_becomes_application_failure() {
        let listener = listener();
        let request = RpcRequest::new("TextService", "lowercase");

        let response = listener.dispatch(&request_packet(&request)).await;
        let failure = response.failure.unwrap();
        assert_eq!(failure.kind, RpcFailureKind::ApplicationError);
        assert!(failure.message.contains("lowercase"));
    }

    #[tokio::test]
    async fn test_guarded_target_fails_closed_without_verifier() {
        let listener = listener();
        let request = RpcRequest::new("NodeControl", "restart");

        let response = listener.dispatch(&request_packet(&request)).await;
        let failure = response.failure.unwrap();
        assert_eq!(failure.kind, RpcFailureKind::ApplicationError);
        assert!(failure.message.contains("authorization failed"));
    }

    #[tokio::test]
    async fn test_guard_verdict_is_honored() {
        struct TokenGuard;
        impl RpcCallGuard for TokenGuard {
            fn authorize(
                &self,
                access_token: Option<&str>,
                _required_permission: &str,
            ) -> Result<(), String> {
                match access_token {
                    Some("secret") => Ok(()),
                    _ => Err("missing or invalid token".to_string()),
                }
            }
        }

        let handlers = Arc::new(RpcHandlerRegistry::new());
        handlers.register_handler(Arc::new(GuardedHandler));
        let mappers = Arc::new(DataMapperRegistry::new());
        let listener =
            RpcDispatchListener::new(handlers, mappers).with_guard(Arc::new(TokenGuard));

        let mut request = RpcRequest::new("NodeControl", "restart");
        request.access_token = Some("secret".to_string());
        assert!(listener.dispatch(&request_packet(&request)).await.is_success());

        request.access_token = Some("wrong".to_string());
        let denied = listener.dispatch(&request_packet(&request)).await;
        assert!(!denied.is_success());
    }

    #[tokio::test]
    async fn test_malformed_request_body() {
        let listener = listener();
        let packet = Packet::new("rpc", Bytes::from_static(b"not json"));

        let response = listener.dispatch(&packet).await;
        assert_eq!(
            response.failure.unwrap().kind,
            RpcFailureKind::UnmappableType
        );
    }

    #[test]
    fn test_registry_last_registration_wins() {
        let registry = RpcHandlerRegistry::new();
        registry.register_handler(Arc::new(UppercaseHandler));
        registry.register_handler(Arc::new(UppercaseHandler));
        assert_eq!(registry.registered_targets(), vec!["TextService"]);

        assert!(registry.unregister_handler("TextService"));
        assert!(!registry.unregister_handler("TextService"));
        assert!(registry.handler("TextService").is_none());
    }
}
