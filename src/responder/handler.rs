//! Request handler seam and the progress emitter handed to it.

use std::future::Future;

use serde_json::Value;

use crate::connection::Outbound;
use crate::protocol::{CorrelationId, Envelope, HandlerError};

/// Application logic served by a [`ResponderConnection`](super::ResponderConnection).
///
/// Invoked once per inbound request, concurrently across requests. Every
/// value passed to `progress.emit()` becomes a `response` envelope, the
/// returned value becomes the final `response`, followed by `complete`.
/// Returning `Err` sends a single `error` envelope instead.
///
/// Implemented for any `Fn(Value, Progress) -> impl Future` closure.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(
        &self,
        request: Value,
        progress: Progress,
    ) -> impl Future<Output = Result<Value, HandlerError>> + Send;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Value, Progress) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    fn handle(
        &self,
        request: Value,
        progress: Progress,
    ) -> impl Future<Output = Result<Value, HandlerError>> + Send {
        self(request, progress)
    }
}

/// Streams intermediate `response` payloads for one request.
///
/// Payloads are sent in call order and always precede the handler's final
/// value.
#[derive(Clone)]
pub struct Progress {
    id: CorrelationId,
    outbound: Outbound,
}

impl Progress {
    pub(crate) fn new(id: CorrelationId, outbound: Outbound) -> Self {
        Self { id, outbound }
    }

    /// Correlation id of the request being served.
    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    /// Send one intermediate payload.
    ///
    /// Returns `false` once the connection stopped accepting envelopes; the
    /// handler may keep going, but nothing more reaches the requester.
    pub async fn emit(&self, payload: Value) -> bool {
        self.outbound.post(Envelope::response(self.id, payload)).await
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").field("id", &self.id).finish()
    }
}
