//! Connection core shared by both peer roles.
//!
//! A [`Connection`] owns exactly one transport for its lifetime. It splits the
//! transport and drives each half from its own task:
//!
//! - Reader task: feeds inbound envelopes to the role's [`Inbound`] sink
//! - Writer task: drains the bounded outbound queue into the transport
//!
//! Request flow never holds a lock across the transport: envelopes are queued
//! on [`Outbound`] and the single writer orders them.

mod correlation;
mod reader;
mod state;
mod writer;

use std::sync::Arc;

use log::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{CorrelationId, Envelope};
use crate::transport::Transport;

pub use state::{CloseReason, ConnectionState};

pub(crate) use reader::Inbound;
pub(crate) use state::Lifecycle;
pub(crate) use writer::Outbound;

use correlation::CorrelationIdGenerator;
use reader::{ReaderTaskHandle, spawn_reader_task};
use writer::{WriterTaskHandle, outbound_queue, spawn_writer_task};

/// Shared base of `RequesterConnection` and `ResponderConnection`.
///
/// # Lifecycle
///
/// `Open -> Closing -> Closed`. Closing is entered by `close()`, by the peer
/// closing the transport, or by a transport failure, whichever comes first;
/// the first reason is kept. `Closed` means the transport has been released.
pub(crate) struct Connection {
    lifecycle: Arc<Lifecycle>,
    outbound: Outbound,
    ids: CorrelationIdGenerator,
    /// Taken by the first `close()` call, which waits for the release
    writer_handle: tokio::sync::Mutex<Option<WriterTaskHandle>>,
    _reader_handle: ReaderTaskHandle,
    role: &'static str,
}

impl Connection {
    /// Take ownership of `transport` and start the reader and writer tasks.
    ///
    /// `make_inbound` builds the role-specific sink; it receives the outbound
    /// queue and lifecycle so responders can reply from their own tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn open<T, I, F>(transport: T, role: &'static str, make_inbound: F) -> Self
    where
        T: Transport,
        I: Inbound,
        F: FnOnce(&Outbound, &Arc<Lifecycle>) -> I,
    {
        let (reader, writer) = transport.split();
        let lifecycle = Arc::new(Lifecycle::new());
        let (outbound, outbound_rx) = outbound_queue();

        let inbound = make_inbound(&outbound, &lifecycle);
        let writer_handle = spawn_writer_task(writer, outbound_rx, Arc::clone(&lifecycle), role);
        let reader_handle = spawn_reader_task(reader, inbound, Arc::clone(&lifecycle), role);

        debug!(target: "workbridge::connection", "[{}] Connection opened", role);

        Self {
            lifecycle,
            outbound,
            ids: CorrelationIdGenerator::new(),
            writer_handle: tokio::sync::Mutex::new(Some(writer_handle)),
            _reader_handle: reader_handle,
            role,
        }
    }

    pub(crate) fn next_correlation_id(&self) -> CorrelationId {
        self.ids.next_id()
    }

    /// Queue an envelope, failing if the connection is no longer open.
    pub(crate) async fn post(&self, envelope: Envelope) -> BridgeResult<()> {
        if !self.lifecycle.is_open() {
            return Err(self.closed_error());
        }
        if self.outbound.post(envelope).await {
            Ok(())
        } else {
            Err(self.closed_error())
        }
    }

    /// Close the connection and wait for the transport to be released.
    ///
    /// Idempotent: every call, concurrent ones included, returns only once
    /// the connection is `Closed`.
    pub(crate) async fn close(&self) {
        if self.lifecycle.begin_close(CloseReason::Requested) {
            debug!(target: "workbridge::connection", "[{}] Closing connection", self.role);
        }

        // Held across the join so concurrent callers wait for the release
        let mut writer_handle = self.writer_handle.lock().await;
        if let Some(handle) = writer_handle.take() {
            handle.join().await;
        }
        self.lifecycle.finish_close();
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.lifecycle.close_reason()
    }

    pub(crate) async fn closed(&self) -> CloseReason {
        self.lifecycle.closed().await
    }

    /// Error for operations attempted on a non-open connection.
    pub(crate) fn closed_error(&self) -> BridgeError {
        BridgeError::connection_closed(self.close_reason().unwrap_or(CloseReason::Requested))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Stops both tasks; the reader then notifies the inbound sink
        self.lifecycle.begin_close(CloseReason::Requested);
    }
}
