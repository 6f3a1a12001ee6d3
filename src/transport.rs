//! Transport abstraction for envelope exchange between two peers.
//!
//! A transport is any duplex channel that preserves message boundaries and
//! order. Connections never open or address transports themselves: they take
//! one fully wired, split it, and drive each half from its own task.
//!
//! # Bindings
//!
//! - [`channel_pair`]: in-process peers over tokio mpsc channels
//! - [`FramedTransport`]: `Content-Length` framed JSON over any
//!   `AsyncRead`/`AsyncWrite` pair (child process pipes, stdio)

mod channel;
mod framed;

use std::future::Future;
use std::io;

use crate::protocol::Envelope;

pub use channel::{ChannelReader, ChannelTransport, ChannelWriter, channel_pair};
pub use framed::{FramedReader, FramedTransport, FramedWriter, MAX_FRAME_SIZE};

/// Receiving half of a transport.
pub trait TransportReader: Send + 'static {
    /// Wait for the next envelope.
    ///
    /// Returns `Ok(None)` once the peer closed the transport cleanly, and
    /// `Err` when the transport terminated unexpectedly. Either way no further
    /// envelopes will arrive.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Envelope>>> + Send;
}

/// Sending half of a transport.
pub trait TransportWriter: Send + 'static {
    /// Send one envelope, preserving order relative to earlier sends.
    fn send(&mut self, envelope: &Envelope) -> impl Future<Output = io::Result<()>> + Send;

    /// Release the transport. The peer observes a clean close.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A duplex transport that can be split into independently driven halves.
pub trait Transport: Send + 'static {
    type Reader: TransportReader;
    type Writer: TransportWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

impl<R, W> Transport for (R, W)
where
    R: TransportReader,
    W: TransportWriter,
{
    type Reader = R;
    type Writer = W;

    fn split(self) -> (R, W) {
        self
    }
}
