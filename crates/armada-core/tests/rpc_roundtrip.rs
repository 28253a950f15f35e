//! End-to-end RPC over real sockets: success, failure taxonomy, timing

use std::{sync::Arc, time::Duration};

use armada_api::{
    model::{HostAndPort, OwnerToken},
    packet::CHANNEL_RPC,
    rpc::RpcValue,
};
use armada_core::{
    EventBus, NetworkClient, NetworkServer, RpcError, RpcFactory,
    rpc::{
        handler::{RpcDispatchListener, RpcHandler, RpcHandlerRegistry},
        mapper::DataMapperRegistry,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobOrder {
    job_id: u64,
    node: String,
}

struct JobService;

#[async_trait]
impl RpcHandler for JobService {
    fn target(&self) -> &str {
        "JobService"
    }

    async fn invoke(
        &self,
        method: &str,
        arguments: &[RpcValue],
    ) -> anyhow::Result<Option<RpcValue>> {
        match method {
            "describe" => {
                let order: JobOrder = arguments[0].decode()?;
                let summary = format!("job {} on {}", order.job_id, order.node);
                Ok(Some(RpcValue::new("string", Value::from(summary))))
            }
            "sleepForever" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
            other => anyhow::bail!("no such method '{}'", other),
        }
    }
}

struct Harness {
    _server: NetworkServer,
    _client: NetworkClient,
    channel: Arc<armada_core::NetworkChannel>,
    factory: RpcFactory,
}

/// One serving node and one calling node. `bind_job_order_remotely`
/// controls whether the serving side knows the jobOrder type.
async fn harness(bind_job_order_remotely: bool) -> Harness {
    let event_bus = Arc::new(EventBus::new());

    let remote_mappers = Arc::new(DataMapperRegistry::new());
    remote_mappers.register_standard_bindings(OwnerToken::random());
    if bind_job_order_remotely {
        remote_mappers.register_binding::<JobOrder>(OwnerToken::random(), "jobOrder");
    }
    let handlers = Arc::new(RpcHandlerRegistry::new());
    handlers.register_handler(Arc::new(JobService));

    let server = NetworkServer::bind(&HostAndPort::new("127.0.0.1", 0), event_bus.clone())
        .await
        .unwrap();
    server.packet_registry().add_listener(
        OwnerToken::random(),
        CHANNEL_RPC,
        Arc::new(RpcDispatchListener::new(handlers, remote_mappers)),
    );

    let local_mappers = Arc::new(DataMapperRegistry::new());
    local_mappers.register_standard_bindings(OwnerToken::random());
    local_mappers.register_binding::<JobOrder>(OwnerToken::random(), "jobOrder");

    let client = NetworkClient::new(event_bus, Duration::from_secs(5));
    let channel = client
        .connect(&HostAndPort::new("127.0.0.1", server.local_address().port()))
        .await
        .unwrap();

    Harness {
        _server: server,
        _client: client,
        channel,
        factory: RpcFactory::new(local_mappers, Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn test_successful_call_with_typed_result() {
    let harness = harness(true).await;

    let summary: String = harness
        .factory
        .sender("JobService")
        .invoke("describe")
        .arg(
            "jobOrder",
            &JobOrder {
                job_id: 17,
                node: "Node-2".to_string(),
            },
        )
        .fire_as(&harness.channel)
        .await
        .unwrap();
    assert_eq!(summary, "job 17 on Node-2");
}

#[tokio::test]
async fn test_unknown_target_fails_within_one_round_trip() {
    let harness = harness(true).await;

    // The sender timeout is generous on purpose; the failure must come
    // back from the remote side long before it would fire.
    let call = harness
        .factory
        .sender("GhostService")
        .with_timeout(Duration::from_secs(60))
        .invoke("anything")
        .fire(&harness.channel);

    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("unknown target must not hang until the caller timeout");
    match result {
        Err(RpcError::UnknownTarget { target }) => assert_eq!(target, "GhostService"),
        other => panic!("expected UnknownTarget, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_mapping_gap_on_the_remote_side() {
    // jobOrder is bound locally but not on the serving side
    let harness = harness(false).await;

    let error = harness
        .factory
        .sender("JobService")
        .invoke("describe")
        .arg(
            "jobOrder",
            &JobOrder {
                job_id: 1,
                node: "Node-1".to_string(),
            },
        )
        .fire(&harness.channel)
        .await
        .unwrap_err();

    match error {
        RpcError::UnmappableType(message) => assert!(message.contains("jobOrder")),
        other => panic!("expected UnmappableType, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_handler_times_out_locally() {
    let harness = harness(true).await;

    let error = harness
        .factory
        .sender("JobService")
        .with_timeout(Duration::from_millis(200))
        .invoke("sleepForever")
        .fire(&harness.channel)
        .await
        .unwrap_err();

    match error {
        RpcError::Timeout {
            target,
            method,
            timeout_millis,
            ..
        } => {
            assert_eq!(target, "JobService");
            assert_eq!(method, "sleepForever");
            assert_eq!(timeout_millis, 200);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_failure_reports_remote_application_error() {
    let harness = harness(true).await;

    let error = harness
        .factory
        .sender("JobService")
        .invoke("explode")
        .fire(&harness.channel)
        .await
        .unwrap_err();

    match error {
        RpcError::RemoteApplication {
            target,
            method,
            message,
        } => {
            assert_eq!(target, "JobService");
            assert_eq!(method, "explode");
            assert!(message.contains("explode"));
        }
        other => panic!("expected RemoteApplication, got {:?}", other),
    }
}
