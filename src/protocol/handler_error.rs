//! Serializable description of a failed handler invocation.
//!
//! Travels as the payload of an `error` envelope and surfaces on the requester
//! side as `BridgeError::Handler`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error raised by a responder's request handler.
///
/// `kind` is the classification (for example `TypeError` or `Timeout`),
/// `causes` the flattened source chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl HandlerError {
    /// Classification used when the handler does not provide one
    pub const DEFAULT_KIND: &'static str = "Error";

    /// Classification for a handler task that panicked
    pub const PANIC_KIND: &'static str = "Panic";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Create an error with the default classification
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_KIND, message)
    }

    /// Create an error for a panicked handler task
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(Self::PANIC_KIND, message)
    }

    /// Describe a Rust error, flattening its `source()` chain into `causes`.
    pub fn from_error(kind: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: kind.into(),
            message: error.to_string(),
            causes,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Encode as an envelope payload.
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "kind": self.kind,
            "message": self.message,
        });
        if !self.causes.is_empty() {
            payload["causes"] = serde_json::json!(self.causes);
        }
        payload
    }

    /// Decode an error envelope payload.
    ///
    /// Peers are not trusted to send a well-formed description: a payload that
    /// does not match the expected shape is kept as the message text.
    pub fn from_payload(payload: Value) -> Self {
        match serde_json::from_value::<Self>(payload.clone()) {
            Ok(error) => error,
            Err(_) => match payload {
                Value::String(message) => Self::message(message),
                other => Self::message(other.to_string()),
            },
        }
    }
}
