//! Hand-off between committed subscription sets and the sync engine.
//!
//! The manager pushes one [`SyncRequest`] per committed version through a
//! [`SyncTransport`]. The engine answers each version with a [`SyncAck`],
//! fed back through `SubscriptionSetManager::acknowledge`.

use crate::error::{Result, SyncError};
use crate::subscriptions::SubscriptionSet;
use crate::types::SetVersion;
use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One active query as the server sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub name: Option<String>,
    pub object_type: String,
    /// Filter text, `TRUEPREDICATE` for unfiltered queries.
    pub query: String,
}

/// Full list of active queries for one committed version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub version: SetVersion,
    pub queries: Vec<QueryDescriptor>,
}

impl SyncRequest {
    /// Build the request for a committed set.
    pub fn from_set(set: &SubscriptionSet) -> Self {
        Self {
            version: set.version(),
            queries: set
                .iter()
                .map(|sub| QueryDescriptor {
                    name: sub.name.clone(),
                    object_type: sub.query.object_type.clone(),
                    query: sub.query.filter_text().to_string(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server's answer for one version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum SyncAck {
    /// Every query in the version is fulfilled.
    Fulfilled,
    /// One or more queries were refused.
    Rejected { reason: String },
}

/// Outbound channel to the sync engine.
pub trait SyncTransport: Send + Sync {
    /// Enqueue a request. Must not block on the server.
    fn submit(&self, request: SyncRequest) -> Result<()>;
}

/// Transport that drops every request. Sets stay `Pending` until
/// acknowledged by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl SyncTransport for NullTransport {
    fn submit(&self, _request: SyncRequest) -> Result<()> {
        Ok(())
    }
}

/// In-process transport backed by an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    sender: Sender<SyncRequest>,
}

impl ChannelTransport {
    /// Create a transport and the receiving half the engine drains.
    pub fn new() -> (Self, SyncRequestReceiver) {
        let (sender, receiver) = unbounded();
        (Self { sender }, SyncRequestReceiver { receiver })
    }
}

impl SyncTransport for ChannelTransport {
    fn submit(&self, request: SyncRequest) -> Result<()> {
        self.sender
            .send(request)
            .map_err(|_| SyncError::Transport("sync engine receiver dropped".into()))
    }
}

/// Engine-side end of a [`ChannelTransport`].
pub struct SyncRequestReceiver {
    receiver: Receiver<SyncRequest>,
}

impl SyncRequestReceiver {
    /// Receive the next request (blocking).
    pub fn recv(&self) -> std::result::Result<SyncRequest, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a request (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<SyncRequest, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<SyncRequest, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<SyncRequest> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport_delivers_in_order() {
        let (transport, requests) = ChannelTransport::new();
        for v in 1..=3 {
            transport
                .submit(SyncRequest {
                    version: SetVersion(v),
                    queries: vec![],
                })
                .unwrap();
        }

        let versions: Vec<_> = requests.drain().into_iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![SetVersion(1), SetVersion(2), SetVersion(3)]);
    }

    #[test]
    fn test_submit_after_receiver_dropped() {
        let (transport, requests) = ChannelTransport::new();
        drop(requests);

        let result = transport.submit(SyncRequest {
            version: SetVersion(1),
            queries: vec![],
        });
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[test]
    fn test_request_json_shape() {
        let request = SyncRequest {
            version: SetVersion(2),
            queries: vec![QueryDescriptor {
                name: Some("test".into()),
                object_type: "Cat".into(),
                query: "age > 10".into(),
            }],
        };
        let json: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(json["queries"][0]["object_type"], "Cat");
        assert_eq!(json["queries"][0]["query"], "age > 10");
    }
}
