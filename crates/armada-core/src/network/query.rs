//! Query/response correlation
//!
//! A query is a packet whose sender waits for the response carrying the
//! same correlation id. Pending queries are parked in a map of oneshot
//! senders; the channel read loop completes them as responses arrive. On
//! timeout the id is retired, so a late response finds no waiter and is
//! discarded instead of leaking.

use std::time::Duration;

use armada_api::packet::Packet;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Failure modes of a packet query
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("query {correlation_id} timed out after {timeout_millis} ms")]
    Timeout {
        correlation_id: Uuid,
        timeout_millis: u64,
    },

    #[error("channel closed before the response to query {correlation_id} arrived")]
    ChannelClosed { correlation_id: Uuid },
}

/// Tracks queries awaiting their response on one channel
pub struct QueryPacketManager {
    waiters: DashMap<Uuid, oneshot::Sender<Packet>>,
}

impl QueryPacketManager {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Park a waiter for `correlation_id` and hand back its receiver.
    pub fn register(&self, correlation_id: Uuid) -> oneshot::Receiver<Packet> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id, tx);
        rx
    }

    /// Complete the waiter parked for this response, if any. Returns false
    /// when the id was already retired (the response is stale and the
    /// caller should drop it).
    pub fn complete(&self, response: Packet) -> bool {
        match self.waiters.remove(&response.correlation_id) {
            Some((correlation_id, tx)) => {
                // A receiver dropped between retire and complete is fine
                if tx.send(response).is_err() {
                    debug!(%correlation_id, "query waiter vanished before completion");
                }
                true
            }
            None => false,
        }
    }

    /// Drop the waiter for `correlation_id`, making any later response for
    /// it stale.
    pub fn retire(&self, correlation_id: &Uuid) -> bool {
        self.waiters.remove(correlation_id).is_some()
    }

    /// Fail every pending query; used when the channel closes.
    pub fn retire_all(&self) {
        self.waiters.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    /// Await the response for a registered query, retiring the id on
    /// timeout or channel loss.
    pub async fn wait(
        &self,
        correlation_id: Uuid,
        receiver: oneshot::Receiver<Packet>,
        timeout: Duration,
    ) -> Result<Packet, QueryError> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.retire(&correlation_id);
                Err(QueryError::ChannelClosed { correlation_id })
            }
            Err(_) => {
                self.retire(&correlation_id);
                Err(QueryError::Timeout {
                    correlation_id,
                    timeout_millis: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Default for QueryPacketManager {
    fn default() -> Self {
        Self::new()
    }
}
