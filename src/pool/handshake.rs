//! Readiness handshake between the pool and a freshly launched worker.
//!
//! The pool sends a single request `{"method": "$/ready"}` and expects the
//! worker to answer `{"ready": true}` before it is considered `Ready`.
//! Workers opt in by wrapping their handler in [`WithHandshake`].

use serde_json::{Value, json};

use super::HandshakeTimeout;
use crate::protocol::HandlerError;
use crate::requester::RequesterConnection;
use crate::responder::{Progress, RequestHandler};

/// Method name of the readiness probe.
pub const READY_METHOD: &str = "$/ready";

pub(crate) fn build_ready_request() -> Value {
    json!({ "method": READY_METHOD })
}

pub(crate) fn is_ready_request(request: &Value) -> bool {
    request.get("method").and_then(Value::as_str) == Some(READY_METHOD)
}

pub(crate) fn ready_response() -> Value {
    json!({ "ready": true })
}

/// Check the payloads the worker sent back for the probe.
///
/// The last payload must be `{"ready": true}`; earlier ones are ignored.
pub(crate) fn validate_ready_response(payloads: &[Value]) -> Result<(), String> {
    match payloads.last() {
        Some(last) if last.get("ready").and_then(Value::as_bool) == Some(true) => Ok(()),
        Some(last) => Err(format!("unexpected readiness reply: {}", last)),
        None => Err("empty readiness reply".to_string()),
    }
}

/// Probe the worker and wait for its readiness reply.
pub(crate) async fn perform_handshake(
    connection: &RequesterConnection,
    timeout: HandshakeTimeout,
) -> Result<(), String> {
    let payloads = connection
        .send_with_timeout(build_ready_request(), timeout.as_duration())
        .await
        .map_err(|e| e.to_string())?;
    validate_ready_response(&payloads)
}

/// Handler adapter answering the readiness probe before delegating.
///
/// # Usage
///
/// ```ignore
/// let responder = ResponderConnection::new(FramedTransport::stdio(), WithHandshake::new(handler));
/// ```
pub struct WithHandshake<H> {
    inner: H,
}

impl<H> WithHandshake<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: RequestHandler> RequestHandler for WithHandshake<H> {
    async fn handle(&self, request: Value, progress: Progress) -> Result<Value, HandlerError> {
        if is_ready_request(&request) {
            return Ok(ready_response());
        }
        self.inner.handle(request, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_recognized() {
        assert!(is_ready_request(&build_ready_request()));
        assert!(!is_ready_request(&json!({"method": "run"})));
        assert!(!is_ready_request(&json!("$/ready")));
    }

    #[test]
    fn reply_validation() {
        assert!(validate_ready_response(&[ready_response()]).is_ok());
        assert!(validate_ready_response(&[json!("booting"), ready_response()]).is_ok());
        assert!(validate_ready_response(&[]).is_err());
        assert!(validate_ready_response(&[json!({"ready": false})]).is_err());
    }
}
