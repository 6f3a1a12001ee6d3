//! Reader task for the receiving half of a transport.
//!
//! The Reader Task:
//! - Runs in a spawned tokio task, one per connection
//! - Hands every inbound envelope to the role-specific [`Inbound`] sink
//! - Drops envelopes that arrive once close has begun
//! - Records the close reason on EOF or read error and notifies the sink

use std::sync::Arc;

use log::{debug, warn};
use tokio::task::JoinHandle;

use super::state::{CloseReason, Lifecycle};
use crate::protocol::Envelope;
use crate::transport::TransportReader;

/// Role-specific consumer of inbound envelopes.
///
/// Owned by the reader task, so methods take `&mut self` and are never
/// called concurrently.
pub(crate) trait Inbound: Send + 'static {
    /// Handle one envelope received while the connection is open.
    fn deliver(&mut self, envelope: Envelope);

    /// Called exactly once when the reader stops, with the recorded reason.
    fn closed(&mut self, reason: &CloseReason);
}

/// Handle to a running Reader Task.
///
/// The task stops through the connection's cancellation token; the join
/// handle is kept so the task stays associated with its connection.
pub(crate) struct ReaderTaskHandle {
    _join_handle: JoinHandle<()>,
}

/// Spawn a reader task that feeds `inbound` until the connection closes.
pub(crate) fn spawn_reader_task<R, I>(
    reader: R,
    inbound: I,
    lifecycle: Arc<Lifecycle>,
    role: &'static str,
) -> ReaderTaskHandle
where
    R: TransportReader,
    I: Inbound,
{
    let join_handle = tokio::spawn(reader_loop(reader, inbound, lifecycle, role));
    ReaderTaskHandle {
        _join_handle: join_handle,
    }
}

async fn reader_loop<R, I>(mut reader: R, mut inbound: I, lifecycle: Arc<Lifecycle>, role: &'static str)
where
    R: TransportReader,
    I: Inbound,
{
    let cancel_token = lifecycle.cancel_token().clone();

    loop {
        tokio::select! {
            // Close wins over anything still queued on the transport
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "workbridge::connection::reader",
                    "[{}] Reader task cancelled, shutting down",
                    role
                );
                break;
            }

            result = reader.recv() => {
                match result {
                    Ok(Some(envelope)) => {
                        if lifecycle.is_open() {
                            inbound.deliver(envelope);
                        } else {
                            debug!(
                                target: "workbridge::connection::reader",
                                "[{}] Dropping {:?} envelope {} received after close",
                                role,
                                envelope.kind,
                                envelope.correlation_id
                            );
                        }
                    }
                    Ok(None) => {
                        debug!(
                            target: "workbridge::connection::reader",
                            "[{}] Peer closed the transport",
                            role
                        );
                        lifecycle.begin_close(CloseReason::PeerClosed);
                        break;
                    }
                    Err(e) => {
                        warn!(
                            target: "workbridge::connection::reader",
                            "[{}] Reader error: {}, closing connection",
                            role,
                            e
                        );
                        lifecycle.begin_close(CloseReason::TransportFailed(e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    let reason = lifecycle.close_reason().unwrap_or(CloseReason::Requested);
    inbound.closed(&reason);
}
