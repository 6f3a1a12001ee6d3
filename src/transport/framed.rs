//! Content-Length framed transport over byte streams.
//!
//! Each envelope is written as `Content-Length: N\r\n\r\n{json}`, the same
//! base framing language servers use on stdio. Works for child process pipes
//! on the orchestrator side and for stdin/stdout on the worker side.

use std::io;

use log::debug;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

use super::{Transport, TransportReader, TransportWriter};
use crate::protocol::Envelope;

const CONTENT_LENGTH: &str = "Content-Length:";

/// Largest frame body accepted from a peer.
///
/// A bogus length from a misbehaving peer fails that transport instead of
/// exhausting memory in the reading process.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Framed transport over a reader/writer byte stream pair.
pub struct FramedTransport<R, W> {
    reader: FramedReader<R>,
    writer: FramedWriter<W>,
}

/// Receiving half of a [`FramedTransport`].
pub struct FramedReader<R> {
    reader: BufReader<R>,
}

/// Sending half of a [`FramedTransport`].
pub struct FramedWriter<W> {
    writer: W,
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedReader::new(reader),
            writer: FramedWriter::new(writer),
        }
    }
}

impl FramedTransport<Stdin, Stdout> {
    /// Transport over this process's stdin/stdout, for worker processes.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> Transport for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Reader = FramedReader<R>;
    type Writer = FramedWriter<W>;

    fn split(self) -> (FramedReader<R>, FramedWriter<W>) {
        (self.reader, self.writer)
    }
}

impl<R> FramedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read one framed message.
    ///
    /// Returns `Ok(None)` on EOF before a header starts; EOF inside a frame is
    /// an `UnexpectedEof` error.
    async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                if saw_header {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "framed transport: EOF inside frame header",
                    ));
                }
                return Ok(None);
            }
            saw_header = true;

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix(CONTENT_LENGTH) {
                let length = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("framed transport: invalid Content-Length: {}", e),
                    )
                })?;
                content_length = Some(length);
            } else {
                debug!(
                    target: "workbridge::transport::framed",
                    "Ignoring unknown header: {}",
                    line
                );
            }
        }

        let length = content_length.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "framed transport: missing Content-Length header",
            )
        })?;

        if length > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "framed transport: frame of {} bytes exceeds limit of {} bytes",
                    length, MAX_FRAME_SIZE
                ),
            ));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }
}

impl<R> TransportReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> io::Result<Option<Envelope>> {
        let Some(body) = self.read_frame().await? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> TransportWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, envelope: &Envelope) -> io::Result<()> {
        let body = serde_json::to_vec(envelope)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let header = format!("{} {}\r\n\r\n", CONTENT_LENGTH, body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
