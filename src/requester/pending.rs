//! Pending request tracking for the requester role.
//!
//! This module provides `PendingRequests`, which tracks in-flight correlation
//! ids, accumulates streamed payloads, and resolves each waiter exactly once
//! via a oneshot channel.
//!
//! - Before sending a request, `register(id)` returns the oneshot Receiver
//! - The Reader Task calls `route(envelope)` for every inbound envelope
//! - The requester awaits the Receiver without holding any lock

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::CloseReason;
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::{CorrelationId, Envelope, EnvelopeKind, HandlerError};

/// Final outcome delivered to a waiting requester.
pub(crate) type Outcome = BridgeResult<Vec<Value>>;

/// Outcome of routing a single inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteResult {
    /// A `response` payload was appended to its accumulator
    Accumulated,
    /// A `complete` envelope resolved its waiter
    Completed,
    /// An `error` envelope rejected its waiter
    Failed,
    /// No live waiter for this correlation id; the envelope was dropped
    Orphaned,
    /// A `request` envelope arrived at the requester; dropped
    Unexpected,
}

struct PendingRequest {
    accumulated: Vec<Value>,
    completion: oneshot::Sender<Outcome>,
}

/// Tracks in-flight requests of one connection.
///
/// All state sits behind a single mutex. Once `fail_all` ran, the table stays
/// closed: later registrations are refused, so a request racing with close can
/// never be left without a resolution.
pub(crate) struct PendingRequests {
    state: Mutex<PendingState>,
}

struct PendingState {
    pending: HashMap<CorrelationId, PendingRequest>,
    closed: Option<CloseReason>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PendingState {
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Register a pending request and return a receiver for its outcome.
    ///
    /// Must be called before the request envelope is queued so that replies
    /// can be routed as soon as they arrive.
    pub(crate) fn register(&self, id: CorrelationId) -> BridgeResult<oneshot::Receiver<Outcome>> {
        let mut state = self.state.lock().recover_poison("PendingRequests::register()");

        if let Some(reason) = &state.closed {
            return Err(BridgeError::connection_closed(reason.clone()));
        }
        if state.pending.contains_key(&id) {
            return Err(BridgeError::DuplicateCorrelationId(id));
        }

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingRequest {
                accumulated: Vec::new(),
                completion: tx,
            },
        );
        Ok(rx)
    }

    /// Route an inbound envelope to its pending request.
    pub(crate) fn route(&self, envelope: Envelope) -> RouteResult {
        let Envelope {
            correlation_id,
            kind,
            payload,
        } = envelope;

        let mut state = self.state.lock().recover_poison("PendingRequests::route()");

        match kind {
            EnvelopeKind::Request => RouteResult::Unexpected,
            EnvelopeKind::Response => match state.pending.get_mut(&correlation_id) {
                Some(request) => {
                    request.accumulated.push(payload);
                    RouteResult::Accumulated
                }
                None => RouteResult::Orphaned,
            },
            EnvelopeKind::Complete => {
                let Some(request) = state.pending.remove(&correlation_id) else {
                    return RouteResult::Orphaned;
                };
                drop(state);
                match request.completion.send(Ok(request.accumulated)) {
                    Ok(()) => RouteResult::Completed,
                    Err(_) => RouteResult::Orphaned,
                }
            }
            EnvelopeKind::Error => {
                let Some(request) = state.pending.remove(&correlation_id) else {
                    return RouteResult::Orphaned;
                };
                drop(state);
                let error = HandlerError::from_payload(payload);
                match request.completion.send(Err(BridgeError::Handler(error))) {
                    Ok(()) => RouteResult::Failed,
                    Err(_) => RouteResult::Orphaned,
                }
            }
        }
    }

    /// Remove a pending request without resolving it.
    ///
    /// Used when the requester abandons a request (deadline, dropped future).
    /// A reply arriving later is treated as orphaned.
    ///
    /// Returns `true` if the request was still pending.
    pub(crate) fn remove(&self, id: CorrelationId) -> bool {
        let mut state = self.state.lock().recover_poison("PendingRequests::remove()");
        state.pending.remove(&id).is_some()
    }

    /// Reject every pending request with `ConnectionClosed` and refuse new ones.
    ///
    /// Idempotent; the first reason sticks. Returns how many requests were
    /// rejected by this call.
    pub(crate) fn fail_all(&self, reason: &CloseReason) -> usize {
        let mut state = self.state.lock().recover_poison("PendingRequests::fail_all()");
        let reason = state.closed.get_or_insert_with(|| reason.clone()).clone();
        let entries: Vec<_> = state.pending.drain().collect();

        // Release lock before sending to avoid holding it during channel operations
        drop(state);

        let count = entries.len();
        for (_, request) in entries {
            let _ = request
                .completion
                .send(Err(BridgeError::connection_closed(reason.clone())));
        }
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().recover_poison("PendingRequests::pending_count()").pending.len()
    }
}
