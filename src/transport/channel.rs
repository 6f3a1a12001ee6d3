//! In-process transport backed by tokio mpsc channels.
//!
//! The analogue of a worker-thread message port: two linked ends, each able
//! to send to and receive from the other, with no serialization involved.

use std::io;

use tokio::sync::mpsc;

use super::{Transport, TransportReader, TransportWriter};
use crate::protocol::Envelope;

/// One end of an in-process channel transport.
#[derive(Debug)]
pub struct ChannelTransport {
    reader: ChannelReader,
    writer: ChannelWriter,
}

/// Receiving half of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelReader {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Sending half of a [`ChannelTransport`].
///
/// Closing drops the underlying sender, which the peer's reader observes as
/// a clean end of stream.
#[derive(Debug)]
pub struct ChannelWriter {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
}

/// Create two linked transport ends.
///
/// Whatever one end sends, the other end receives, in order.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    let left = ChannelTransport {
        reader: ChannelReader { rx: left_rx },
        writer: ChannelWriter { tx: Some(left_tx) },
    };
    let right = ChannelTransport {
        reader: ChannelReader { rx: right_rx },
        writer: ChannelWriter { tx: Some(right_tx) },
    };
    (left, right)
}

impl Transport for ChannelTransport {
    type Reader = ChannelReader;
    type Writer = ChannelWriter;

    fn split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }
}

impl TransportReader for ChannelReader {
    async fn recv(&mut self) -> io::Result<Option<Envelope>> {
        Ok(self.rx.recv().await)
    }
}

impl TransportWriter for ChannelWriter {
    async fn send(&mut self, envelope: &Envelope) -> io::Result<()> {
        let Some(tx) = &self.tx else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel transport: already closed",
            ));
        };
        tx.send(envelope.clone()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel transport: peer dropped its receiver",
            )
        })
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        Ok(())
    }
}
