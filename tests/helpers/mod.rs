//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use workbridge::{
    HandlerError, Progress, RequestHandler, RequesterConnection, ResponderConnection, channel_pair,
};

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler used across the integration tests.
///
/// - `"Hello World"` answers `"Hi"`
/// - `{"fail": msg}` fails with kind `TestFailure`
/// - `{"delay_ms": n, "tag": t}` sleeps, then answers `t`
/// - `{"steps": n}` emits `1..=n` as progress, then answers `"done"`
/// - `{"hang": true}` never answers
/// - anything else is echoed back
pub async fn scripted(request: Value, progress: Progress) -> Result<Value, HandlerError> {
    if request == json!("Hello World") {
        return Ok(json!("Hi"));
    }
    if let Some(message) = request.get("fail").and_then(Value::as_str) {
        return Err(HandlerError::new("TestFailure", message));
    }
    if let Some(delay) = request.get("delay_ms").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        return Ok(request.get("tag").cloned().unwrap_or(Value::Null));
    }
    if let Some(steps) = request.get("steps").and_then(Value::as_u64) {
        for step in 1..=steps {
            progress.emit(json!(step)).await;
        }
        return Ok(json!("done"));
    }
    if request.get("hang").and_then(Value::as_bool) == Some(true) {
        std::future::pending::<()>().await;
    }
    Ok(request)
}

/// Requester and responder joined by an in-process channel transport.
pub fn connected<H: RequestHandler>(handler: H) -> (RequesterConnection, ResponderConnection) {
    let (orchestrator_end, worker_end) = channel_pair();
    let responder = ResponderConnection::new(worker_end, handler);
    (RequesterConnection::new(orchestrator_end), responder)
}

/// Poll `condition` until it holds or the test timeout expires.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold before the test timeout");
}
