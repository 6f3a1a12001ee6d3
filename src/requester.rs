//! Requester role: issue correlated requests and collect their replies.
//!
//! The orchestrator side of a connection. Each `send()` registers a pending
//! tracker, queues a `request` envelope and suspends on a oneshot receiver
//! until the responder's `complete` or `error` envelope (or connection close)
//! resolves it.

mod pending;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::{CloseReason, Connection, ConnectionState, Inbound};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{CorrelationId, Envelope};
use crate::transport::Transport;

use pending::{PendingRequests, RouteResult};

/// Orchestrator-side peer of a connection.
///
/// Concurrent `send()` calls are independent and may complete in any order;
/// payloads are only ordered within one request.
///
/// # Usage
///
/// ```ignore
/// let requester = RequesterConnection::new(transport);
/// let replies = requester.send(json!("Hello World")).await?;
/// ```
pub struct RequesterConnection {
    connection: Connection,
    pending: Arc<PendingRequests>,
}

/// Inbound sink routing replies to pending requests.
struct ReplyRouter {
    pending: Arc<PendingRequests>,
}

impl Inbound for ReplyRouter {
    fn deliver(&mut self, envelope: Envelope) {
        let id = envelope.correlation_id;
        let kind = envelope.kind;
        match self.pending.route(envelope) {
            RouteResult::Accumulated | RouteResult::Completed | RouteResult::Failed => {}
            RouteResult::Orphaned => {
                debug!(
                    target: "workbridge::requester",
                    "Orphaned {:?} envelope {}, dropping",
                    kind,
                    id
                );
            }
            RouteResult::Unexpected => {
                warn!(
                    target: "workbridge::requester",
                    "Requester received a request envelope {}, dropping",
                    id
                );
            }
        }
    }

    fn closed(&mut self, reason: &CloseReason) {
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            debug!(
                target: "workbridge::requester",
                "Connection closed ({}), rejected {} pending request(s)",
                reason,
                failed
            );
        }
    }
}

/// Removes the pending entry if the `send()` future is dropped before it
/// resolves, so a late reply is dropped as orphaned.
struct AbandonGuard<'a> {
    pending: &'a PendingRequests,
    id: CorrelationId,
    armed: bool,
}

impl AbandonGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.remove(self.id) {
            debug!(
                target: "workbridge::requester",
                "Request {} abandoned before completion",
                self.id
            );
        }
    }
}

impl RequesterConnection {
    /// Take ownership of `transport` and start routing replies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T: Transport>(transport: T) -> Self {
        let pending = Arc::new(PendingRequests::new());
        let router = ReplyRouter {
            pending: Arc::clone(&pending),
        };
        let connection = Connection::open(transport, "requester", move |_, _| router);
        Self {
            connection,
            pending,
        }
    }

    /// Send a request and wait for every payload the responder streams back.
    ///
    /// Resolves with the payloads in arrival order once the `complete`
    /// envelope arrives. Fails with `BridgeError::Handler` if the remote
    /// handler failed and with `BridgeError::ConnectionClosed` if the
    /// connection closes first.
    ///
    /// Dropping the returned future abandons the request.
    pub async fn send(&self, request: Value) -> BridgeResult<Vec<Value>> {
        let id = self.connection.next_correlation_id();
        let receiver = self.pending.register(id)?;
        let mut guard = AbandonGuard {
            pending: &self.pending,
            id,
            armed: true,
        };

        self.connection.post(Envelope::request(id, request)).await?;

        let outcome = receiver.await;
        guard.disarm();
        match outcome {
            Ok(result) => result,
            // Sender dropped without an outcome: only happens when the table is torn down
            Err(_) => Err(self.connection.closed_error()),
        }
    }

    /// Like [`send`](Self::send), abandoning the request after `timeout`.
    ///
    /// A reply arriving after the deadline is dropped silently.
    pub async fn send_with_timeout(
        &self,
        request: Value,
        timeout: Duration,
    ) -> BridgeResult<Vec<Value>> {
        match tokio::time::timeout(timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout { timeout }),
        }
    }

    /// Typed variant of [`send`](Self::send) using serde on both ends.
    pub async fn request<Req, Resp>(&self, request: &Req) -> BridgeResult<Vec<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        self.send(payload)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(BridgeError::from))
            .collect()
    }

    /// Close the connection, rejecting every pending request.
    ///
    /// Idempotent. When this returns, all pending requests have been rejected
    /// with `ConnectionClosed` and the transport is released.
    pub async fn close(&self) {
        self.connection.close().await;
        let reason = self.connection.close_reason().unwrap_or(CloseReason::Requested);
        self.pending.fail_all(&reason);
    }

    /// Wait until the connection closes, for whatever reason.
    pub async fn closed(&self) -> CloseReason {
        self.connection.closed().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.connection.close_reason()
    }

    /// Number of requests awaiting a terminal envelope.
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EnvelopeKind, HandlerError};
    use crate::transport::{
        ChannelReader, ChannelWriter, TransportReader, TransportWriter, channel_pair,
    };
    use serde_json::json;

    /// Requester wired to a raw peer the test drives by hand.
    fn requester_with_raw_peer() -> (Arc<RequesterConnection>, ChannelReader, ChannelWriter) {
        let (local, remote) = channel_pair();
        let (peer_reader, peer_writer) = remote.split();
        (Arc::new(RequesterConnection::new(local)), peer_reader, peer_writer)
    }

    async fn next_request(peer_reader: &mut ChannelReader) -> Envelope {
        let envelope = peer_reader
            .recv()
            .await
            .expect("transport should be healthy")
            .expect("peer should receive a request");
        assert_eq!(envelope.kind, EnvelopeKind::Request);
        envelope
    }

    #[tokio::test]
    async fn send_resolves_with_streamed_payloads() {
        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();

        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!("run")).await })
        };

        let request = next_request(&mut peer_reader).await;
        let id = request.correlation_id;
        for step in ["loading", "done"] {
            peer_writer.send(&Envelope::response(id, json!(step))).await.unwrap();
        }
        peer_writer.send(&Envelope::complete(id)).await.unwrap();

        let payloads = call.await.unwrap().expect("send should resolve");
        assert_eq!(payloads, vec![json!("loading"), json!("done")]);
        assert_eq!(requester.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_envelope_rejects_with_handler_error() {
        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();

        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!("explode")).await })
        };

        let request = next_request(&mut peer_reader).await;
        let error = HandlerError::new("AssertionError", "expected 1, got 2");
        peer_writer
            .send(&Envelope::error(request.correlation_id, &error))
            .await
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.handler_error(), Some(&error));
    }

    #[tokio::test]
    async fn timeout_abandons_and_late_reply_is_dropped() {
        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();

        let err = requester
            .send_with_timeout(json!("slow"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert_eq!(requester.pending_count(), 0, "abandoned tracker removed");

        // Late reply for the abandoned id must not disturb the next request
        let abandoned = next_request(&mut peer_reader).await;
        peer_writer
            .send(&Envelope::response(abandoned.correlation_id, json!("late")))
            .await
            .unwrap();
        peer_writer
            .send(&Envelope::complete(abandoned.correlation_id))
            .await
            .unwrap();

        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!("fast")).await })
        };
        let request = next_request(&mut peer_reader).await;
        assert_ne!(request.correlation_id, abandoned.correlation_id);
        peer_writer
            .send(&Envelope::response(request.correlation_id, json!("ok")))
            .await
            .unwrap();
        peer_writer.send(&Envelope::complete(request.correlation_id)).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![json!("ok")]);
        assert_eq!(requester.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn peer_close_rejects_pending_with_peer_closed() {
        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();

        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!("wait")).await })
        };
        next_request(&mut peer_reader).await;
        peer_writer.close().await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ConnectionClosed {
                reason: CloseReason::PeerClosed
            }
        ));
    }

    #[tokio::test]
    async fn replies_arriving_after_close_are_not_processed() {
        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();

        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!("wait")).await })
        };
        let request = next_request(&mut peer_reader).await;

        requester.close().await;

        // The requester's receiving end may already be gone
        let _ = peer_writer
            .send(&Envelope::response(request.correlation_id, json!("late")))
            .await;
        let _ = peer_writer.send(&Envelope::complete(request.correlation_id)).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ConnectionClosed {
                reason: CloseReason::Requested
            }
        ));
        assert_eq!(requester.pending_count(), 0);
        assert_eq!(requester.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_after_close_fails_immediately() {
        let (requester, _peer_reader, _peer_writer) = requester_with_raw_peer();

        requester.close().await;
        let err = requester.send(json!("too late")).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ConnectionClosed {
                reason: CloseReason::Requested
            }
        ));
        assert_eq!(requester.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn typed_request_decodes_each_payload() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Score {
            passed: u32,
        }

        let (requester, mut peer_reader, mut peer_writer) = requester_with_raw_peer();
        let call = {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move {
                requester
                    .request::<_, Score>(&json!({"suite": "login"}))
                    .await
            })
        };

        let request = next_request(&mut peer_reader).await;
        assert_eq!(request.payload["suite"], "login");
        peer_writer
            .send(&Envelope::response(request.correlation_id, json!({"passed": 4})))
            .await
            .unwrap();
        peer_writer.send(&Envelope::complete(request.correlation_id)).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), vec![Score { passed: 4 }]);
    }
}
