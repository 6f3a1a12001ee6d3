//! Responder role: serve inbound requests with a [`RequestHandler`].
//!
//! The worker side of a connection. Each inbound `request` envelope is served
//! by its own tokio task:
//!
//! ```text
//! request ──▶ handler(payload, progress)
//!               │  progress.emit(v)  ──▶ response(v)   (0..n, in call order)
//!               ├─ Ok(value)         ──▶ response(value), complete
//!               └─ Err(e) / panic    ──▶ error({kind, message, causes})
//! ```
//!
//! Handler tasks never block each other or the reader. Closing the
//! connection aborts whatever is still running.

mod handler;

use std::any::Any;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::connection::{CloseReason, Connection, ConnectionState, Inbound, Outbound};
use crate::protocol::{CorrelationId, Envelope, EnvelopeKind, HandlerError};
use crate::transport::Transport;

pub use handler::{Progress, RequestHandler};

/// Worker-side peer of a connection.
///
/// # Usage
///
/// ```ignore
/// let responder = ResponderConnection::new(FramedTransport::stdio(), |request, _progress| async move {
///     Ok(json!("Hi"))
/// });
/// responder.closed().await;
/// ```
pub struct ResponderConnection {
    connection: Connection,
}

impl ResponderConnection {
    /// Take ownership of `transport` and start serving requests with `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T, H>(transport: T, handler: H) -> Self
    where
        T: Transport,
        H: RequestHandler,
    {
        let handler = Arc::new(handler);
        let connection = Connection::open(transport, "responder", |outbound, lifecycle| {
            RequestDispatcher {
                handler,
                outbound: outbound.clone(),
                cancel_token: lifecycle.cancel_token().clone(),
            }
        });
        Self { connection }
    }

    /// Close the connection, aborting in-flight handler tasks.
    ///
    /// Idempotent.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// Wait until the connection closes, for whatever reason.
    ///
    /// Worker processes typically park on this until the orchestrator hangs up.
    pub async fn closed(&self) -> CloseReason {
        self.connection.closed().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.connection.close_reason()
    }
}

/// Inbound sink spawning one serving task per request.
struct RequestDispatcher<H> {
    handler: Arc<H>,
    outbound: Outbound,
    cancel_token: CancellationToken,
}

impl<H: RequestHandler> Inbound for RequestDispatcher<H> {
    fn deliver(&mut self, envelope: Envelope) {
        if envelope.kind != EnvelopeKind::Request {
            warn!(
                target: "workbridge::responder",
                "Responder received a {:?} envelope {}, dropping",
                envelope.kind,
                envelope.correlation_id
            );
            return;
        }

        let handler = Arc::clone(&self.handler);
        let outbound = self.outbound.clone();
        let cancel_token = self.cancel_token.clone();
        let id = envelope.correlation_id;

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!(
                        target: "workbridge::responder",
                        "Request {} aborted by connection close",
                        id
                    );
                }
                _ = serve_request(handler, outbound, id, envelope.payload) => {}
            }
        });
    }

    fn closed(&mut self, reason: &CloseReason) {
        debug!(
            target: "workbridge::responder",
            "Responder connection closed: {}",
            reason
        );
    }
}

/// Run the handler for one request and emit its terminal envelopes.
async fn serve_request<H: RequestHandler>(
    handler: Arc<H>,
    outbound: Outbound,
    id: CorrelationId,
    payload: Value,
) {
    let progress = Progress::new(id, outbound.clone());

    // Separate task so a panic surfaces as a JoinError instead of unwinding
    // through the connection; dropping the handle aborts the handler.
    let task = AbortOnDropHandle::new(tokio::spawn(async move {
        handler.handle(payload, progress).await
    }));

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            warn!(
                target: "workbridge::responder",
                "Handler for request {} panicked: {}",
                id,
                message
            );
            Err(HandlerError::panic(message))
        }
        Err(_) => Err(HandlerError::new("Cancelled", "handler task was cancelled")),
    };

    let delivered = match outcome {
        Ok(value) => {
            outbound.post(Envelope::response(id, value)).await
                && outbound.post(Envelope::complete(id)).await
        }
        Err(error) => {
            debug!(
                target: "workbridge::responder",
                "Handler for request {} failed: {}",
                id,
                error
            );
            outbound.post(Envelope::error(id, &error)).await
        }
    };

    if !delivered {
        debug!(
            target: "workbridge::responder",
            "Connection closed before request {} could be answered",
            id
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
