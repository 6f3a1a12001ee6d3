//! Connection lifecycle state machine.

use std::fmt;
use std::sync::RwLock;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::LockResultExt;

/// State of a connection.
///
/// State transitions:
/// - Open -> Closing (local `close()`, peer close, transport failure)
/// - Closing -> Closed (writer half released)
///
/// `Closed` is terminal; there is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Envelopes flow in both directions
    Open,
    /// Close has begun; inbound envelopes are dropped, new sends rejected
    Closing,
    /// Transport released (terminal state)
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owning peer called `close()`
    Requested,
    /// The remote end closed the transport cleanly
    PeerClosed,
    /// The transport failed while reading or writing
    TransportFailed(String),
}

impl CloseReason {
    /// Whether the close was initiated locally.
    pub fn is_requested(&self) -> bool {
        matches!(self, CloseReason::Requested)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed by request"),
            CloseReason::PeerClosed => write!(f, "peer closed the transport"),
            CloseReason::TransportFailed(message) => write!(f, "transport failed: {}", message),
        }
    }
}

/// Lifecycle shared between a connection and its reader/writer tasks.
///
/// The first close wins: its reason is recorded and later attempts only
/// observe it. The cancellation token stops both tasks.
pub(crate) struct Lifecycle {
    state: RwLock<ConnectionState>,
    reason: watch::Sender<Option<CloseReason>>,
    cancel_token: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            state: RwLock::new(ConnectionState::Open),
            reason,
            cancel_token: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read().recover_poison("Lifecycle::state()")
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start closing with the given reason.
    ///
    /// Returns `true` if this call moved the connection out of `Open`.
    /// Always cancels the reader/writer tasks.
    ///
    /// The reason is recorded before the state lock is released, so anyone
    /// observing a non-`Open` state also observes its reason.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let initiated = {
            let mut state = self.state.write().recover_poison("Lifecycle::begin_close()");
            if *state == ConnectionState::Open {
                self.reason.send_replace(Some(reason));
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        };

        self.cancel_token.cancel();
        initiated
    }

    /// Mark the transport as released.
    pub(crate) fn finish_close(&self) {
        *self.state.write().recover_poison("Lifecycle::finish_close()") = ConnectionState::Closed;
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.reason.borrow().clone()
    }

    /// Wait until a close reason is recorded.
    pub(crate) async fn closed(&self) -> CloseReason {
        let mut rx = self.reason.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Requested),
            // The sender lives as long as self, so this is unreachable in practice
            Err(_) => CloseReason::Requested,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}
