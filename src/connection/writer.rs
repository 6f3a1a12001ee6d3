//! Writer task for the sending half of a transport.
//!
//! Single-writer actor: every envelope a connection emits (requests,
//! responses from concurrent handler tasks, terminal envelopes) passes through
//! one bounded queue, so the transport sees a single ordered stream.
//!
//! On close the writer stops taking from the queue, releases the transport and
//! marks the connection `Closed`.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::state::{CloseReason, Lifecycle};
use crate::protocol::Envelope;
use crate::transport::TransportWriter;

/// Queue capacity for outbound envelopes.
///
/// Bounds memory per connection and applies backpressure to senders when the
/// transport cannot keep up.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Upper bound for releasing the transport once the writer stops.
///
/// A peer that never drains its pipe must not hold `close()` forever.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle for queueing envelopes onto a connection's writer.
#[derive(Clone)]
pub(crate) struct Outbound {
    tx: mpsc::Sender<Envelope>,
}

impl Outbound {
    /// Queue an envelope for writing.
    ///
    /// Waits for queue capacity. Returns `false` if the writer has stopped.
    pub(crate) async fn post(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).await.is_ok()
    }
}

/// Create the outbound queue for one connection.
pub(crate) fn outbound_queue() -> (Outbound, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    (Outbound { tx }, rx)
}

/// Handle to a running Writer Task.
pub(crate) struct WriterTaskHandle {
    join_handle: JoinHandle<()>,
}

impl WriterTaskHandle {
    /// Wait for the writer to release the transport.
    pub(crate) async fn join(self) {
        if let Err(e) = self.join_handle.await {
            error!(
                target: "workbridge::connection::writer",
                "Writer task panicked: {}",
                e
            );
        }
    }
}

/// Spawn a writer task that drains `rx` into the transport.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
    rx: mpsc::Receiver<Envelope>,
    lifecycle: Arc<Lifecycle>,
    role: &'static str,
) -> WriterTaskHandle
where
    W: TransportWriter,
{
    let join_handle = tokio::spawn(writer_loop(writer, rx, lifecycle, role));
    WriterTaskHandle { join_handle }
}

async fn writer_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Envelope>,
    lifecycle: Arc<Lifecycle>,
    role: &'static str,
) where
    W: TransportWriter,
{
    let cancel_token = lifecycle.cancel_token().clone();

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "workbridge::connection::writer",
                    "[{}] Writer task cancelled, releasing transport",
                    role
                );
                break;
            }

            next = rx.recv() => {
                let Some(envelope) = next else {
                    debug!(
                        target: "workbridge::connection::writer",
                        "[{}] All outbound handles dropped, closing",
                        role
                    );
                    lifecycle.begin_close(CloseReason::Requested);
                    break;
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    result = writer.send(&envelope) => result,
                };

                if let Err(e) = result {
                    warn!(
                        target: "workbridge::connection::writer",
                        "[{}] Write error on {:?} envelope {}: {}, closing connection",
                        role,
                        envelope.kind,
                        envelope.correlation_id,
                        e
                    );
                    lifecycle.begin_close(CloseReason::TransportFailed(e.to_string()));
                    break;
                }
            }
        }
    }

    // Anything still queued is discarded with the receiver
    rx.close();

    match tokio::time::timeout(RELEASE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(
            target: "workbridge::connection::writer",
            "[{}] Error releasing transport: {}",
            role,
            e
        ),
        Err(_) => warn!(
            target: "workbridge::connection::writer",
            "[{}] Releasing transport timed out after {:?}",
            role,
            RELEASE_TIMEOUT
        ),
    }
    lifecycle.finish_close();
}
