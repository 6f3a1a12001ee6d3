//! Request/response behavior between a requester and a responder.

mod helpers;

use std::sync::{Arc, Mutex};

use helpers::{TEST_TIMEOUT, connected, eventually, scripted};
use serde_json::{Value, json};
use tokio::io::{duplex, split};
use tokio_test::{assert_pending, assert_ready};
use workbridge::transport::{TransportReader, TransportWriter};
use workbridge::{
    BridgeError, CloseReason, ConnectionState, Envelope, EnvelopeKind, FramedTransport, Progress,
    RequesterConnection, ResponderConnection, Transport, channel_pair,
};

#[tokio::test]
async fn hello_world_round_trip() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&received);
    let (requester, _responder) = connected(move |request: Value, progress: Progress| {
        seen.lock().unwrap().push(request.clone());
        scripted(request, progress)
    });

    let replies = requester.send(json!("Hello World")).await.unwrap();
    assert_eq!(replies, vec![json!("Hi")]);
    assert_eq!(*received.lock().unwrap(), vec![json!("Hello World")]);
}

#[tokio::test]
async fn progress_is_delivered_in_order_before_the_final_value() {
    let (requester, _responder) = connected(scripted);

    let replies = requester.send(json!({"steps": 3})).await.unwrap();
    assert_eq!(replies, vec![json!(1), json!(2), json!(3), json!("done")]);
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let (requester, _responder) = connected(scripted);
    let requester = Arc::new(requester);

    let slow = {
        let requester = Arc::clone(&requester);
        tokio::spawn(async move {
            requester
                .send(json!({"delay_ms": 200, "tag": "slow"}))
                .await
        })
    };
    let fast = {
        let requester = Arc::clone(&requester);
        tokio::spawn(async move { requester.send(json!({"delay_ms": 0, "tag": "fast"})).await })
    };

    assert_eq!(fast.await.unwrap().unwrap(), vec![json!("fast")]);
    assert!(!slow.is_finished(), "slow request is still pending");
    assert_eq!(slow.await.unwrap().unwrap(), vec![json!("slow")]);
}

#[tokio::test]
async fn close_rejects_every_pending_request() {
    let (requester, _responder) = connected(scripted);
    let requester = Arc::new(requester);

    let calls: Vec<_> = (0..5)
        .map(|_| {
            let requester = Arc::clone(&requester);
            tokio::spawn(async move { requester.send(json!({"hang": true})).await })
        })
        .collect();
    eventually(|| requester.pending_count() == 5).await;

    requester.close().await;

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(
            matches!(
                err,
                BridgeError::ConnectionClosed {
                    reason: CloseReason::Requested
                }
            ),
            "unexpected error: {:?}",
            err
        );
    }
    assert_eq!(requester.pending_count(), 0);
    assert_eq!(requester.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn responder_close_rejects_pending_with_peer_closed() {
    let (requester, responder) = connected(scripted);
    let requester = Arc::new(requester);

    let call = {
        let requester = Arc::clone(&requester);
        tokio::spawn(async move { requester.send(json!({"hang": true})).await })
    };
    eventually(|| requester.pending_count() == 1).await;

    responder.close().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ConnectionClosed {
            reason: CloseReason::PeerClosed
        }
    ));
    assert_eq!(requester.closed().await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn handler_failure_stays_local_to_its_request() {
    let (requester, _responder) = connected(scripted);

    let (failed, succeeded) = tokio::join!(
        requester.send(json!({"fail": "element not found"})),
        requester.send(json!("Hello World")),
    );

    let err = failed.unwrap_err();
    let handler_error = err.handler_error().expect("should be a handler error");
    assert_eq!(handler_error.kind, "TestFailure");
    assert_eq!(handler_error.message, "element not found");

    assert_eq!(succeeded.unwrap(), vec![json!("Hi")]);
    assert_eq!(requester.state(), ConnectionState::Open);
}

#[tokio::test]
async fn orphaned_replies_are_ignored() {
    let (orchestrator_end, worker_end) = channel_pair();
    let requester = RequesterConnection::new(orchestrator_end);
    let (mut peer_reader, mut peer_writer) = worker_end.split();

    let mut call = tokio_test::task::spawn(requester.send(json!("ping")));
    assert_pending!(call.poll());

    let request = tokio::time::timeout(TEST_TIMEOUT, peer_reader.recv())
        .await
        .unwrap()
        .unwrap()
        .expect("request should arrive");
    assert_eq!(request.kind, EnvelopeKind::Request);

    // Replies for an id nobody is waiting on
    let stranger = workbridge::CorrelationId::new(request.correlation_id.as_u64() + 1000);
    peer_writer
        .send(&Envelope::response(stranger, json!("who?")))
        .await
        .unwrap();
    peer_writer.send(&Envelope::complete(stranger)).await.unwrap();

    peer_writer
        .send(&Envelope::response(request.correlation_id, json!("pong")))
        .await
        .unwrap();
    peer_writer
        .send(&Envelope::complete(request.correlation_id))
        .await
        .unwrap();

    eventually(|| call.is_woken()).await;
    let replies = assert_ready!(call.poll()).unwrap();
    assert_eq!(replies, vec![json!("pong")]);
    assert_eq!(requester.state(), ConnectionState::Open);
}

#[tokio::test]
async fn works_over_framed_byte_streams() {
    let (orchestrator_io, worker_io) = duplex(64 * 1024);
    let (orchestrator_read, orchestrator_write) = split(orchestrator_io);
    let (worker_read, worker_write) = split(worker_io);

    let _responder =
        ResponderConnection::new(FramedTransport::new(worker_read, worker_write), scripted);
    let requester =
        RequesterConnection::new(FramedTransport::new(orchestrator_read, orchestrator_write));

    assert_eq!(
        requester.send(json!("Hello World")).await.unwrap(),
        vec![json!("Hi")]
    );
    assert_eq!(
        requester.send(json!({"steps": 2})).await.unwrap(),
        vec![json!(1), json!(2), json!("done")]
    );

    requester.close().await;
    assert_eq!(requester.state(), ConnectionState::Closed);
}
