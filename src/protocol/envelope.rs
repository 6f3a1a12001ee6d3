//! Envelope framing for request/response multiplexing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CorrelationId, HandlerError};

/// Kind of an envelope.
///
/// A request opens a correlation; `Response` envelopes stream payloads back;
/// `Complete` and `Error` are terminal and close the correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Request,
    Response,
    Error,
    Complete,
}

/// A single message on the transport.
///
/// Wire shape: `{"correlationId": 7, "kind": "response", "payload": ...}`.
/// A missing `payload` decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn request(correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            correlation_id,
            kind: EnvelopeKind::Request,
            payload,
        }
    }

    pub fn response(correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            correlation_id,
            kind: EnvelopeKind::Response,
            payload,
        }
    }

    pub fn complete(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            kind: EnvelopeKind::Complete,
            payload: Value::Null,
        }
    }

    /// Build the terminal error envelope for a failed handler.
    pub fn error(correlation_id: CorrelationId, error: &HandlerError) -> Self {
        Self {
            correlation_id,
            kind: EnvelopeKind::Error,
            payload: error.to_payload(),
        }
    }
}
