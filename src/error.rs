//! Error handling types for workbridge
//!
//! This module provides the error type shared by connections and the worker pool.

use std::io;
use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

use crate::connection::CloseReason;
use crate::pool::WorkerId;
use crate::protocol::{CorrelationId, HandlerError};

/// Comprehensive error type for messaging operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The remote handler failed; carried back verbatim from the responder
    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The connection (or its transport) closed while the request was pending
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: CloseReason },

    /// Routing to a worker id that is not registered or no longer live
    #[error("Unknown worker: {worker}")]
    UnknownWorker { worker: WorkerId },

    /// The worker's transport closed without the pool asking for it
    #[error("Worker {worker} crashed: {reason}")]
    WorkerCrashed {
        worker: WorkerId,
        reason: CloseReason,
    },

    /// The caller-imposed deadline expired and the request was abandoned
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The launcher could not start the worker
    #[error("Failed to launch worker {worker}: {source}")]
    Launch {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },

    /// The readiness handshake did not succeed
    #[error("Handshake with worker {worker} failed: {message}")]
    Handshake { worker: WorkerId, message: String },

    /// A request with this correlation id is already pending
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// Typed payload could not be encoded or decoded
    #[error("Payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for messaging operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Create a connection-closed error
    pub fn connection_closed(reason: CloseReason) -> Self {
        BridgeError::ConnectionClosed { reason }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::Internal(message.into())
    }

    /// Whether the request failed because its connection went away.
    ///
    /// True for both `ConnectionClosed` and `WorkerCrashed`.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionClosed { .. } | BridgeError::WorkerCrashed { .. }
        )
    }

    /// The remote handler error, if this is a handler failure.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            BridgeError::Handler(error) => Some(error),
            _ => None,
        }
    }
}

/// Helper trait to recover the guard from a poisoned std lock
pub trait LockResultExt<T> {
    /// Return the guard even if the lock was poisoned, logging the recovery.
    ///
    /// The context parameter identifies which operation triggered lock recovery,
    /// helping developers debug thread safety issues.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "workbridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
