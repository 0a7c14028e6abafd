//! Socket ownership layer.
//!
//! [`Transport`] owns the two halves of one connected stream (plain TCP or
//! TLS) together with the shared [`PacketBuffer`]. It is the only place raw
//! socket I/O happens: the HTTP transaction reads its response through
//! [`Transport::fill`], and after an upgrade the very same instance is handed
//! to the websocket connection, bytes already buffered past the response head
//! included. That handoff is a plain ownership transfer; nothing needs to be
//! rebuilt or introspected.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::core::{PacketBuffer, TransportError, TransportResult};

/// Poll window for socket reads; short so the reader can notice shutdown
/// requests and pending writes between reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A connected client stream, TLS-wrapped or not.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Result of one [`Transport::fill`] poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Bytes were appended to the packet buffer.
    Data(usize),
    /// The poll window elapsed with nothing to read.
    Idle,
    /// The peer closed its write side.
    Eof,
}

/// Owns the socket halves, the shared packet buffer, and the write queue
/// accounting used by the reader to yield to pending writes.
pub struct Transport {
    reader: Mutex<ReadHalf<MaybeTlsStream>>,
    writer: Mutex<WriteHalf<MaybeTlsStream>>,
    packet_buffer: StdMutex<PacketBuffer>,
    queued_write_bytes: AtomicUsize,
    is_shutdown: AtomicBool,
    read_timeout: StdMutex<Duration>,
}

impl Transport {
    pub fn new(stream: MaybeTlsStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            packet_buffer: StdMutex::new(PacketBuffer::with_capacity(READ_CHUNK_SIZE)),
            queued_write_bytes: AtomicUsize::new(0),
            is_shutdown: AtomicBool::new(false),
            read_timeout: StdMutex::new(DEFAULT_READ_TIMEOUT),
        }
    }

    /// Read whatever the socket has within one poll window and append it to
    /// the packet buffer.
    pub async fn fill(&self) -> TransportResult<FillOutcome> {
        if self.is_shutdown() {
            return Err(TransportError::InvalidState(
                "transport is shut down".to_owned(),
            ));
        }

        let window = self.read_timeout();
        let mut scratch = [0u8; READ_CHUNK_SIZE];
        let mut reader = self.reader.lock().await;

        match tokio::time::timeout(window, reader.read(&mut scratch)).await {
            Err(_elapsed) => Ok(FillOutcome::Idle),
            Ok(Ok(0)) => Ok(FillOutcome::Eof),
            Ok(Ok(count)) => {
                drop(reader);
                self.with_buffer(|buffer| buffer.append(&scratch[..count]));
                Ok(FillOutcome::Data(count))
            }
            Ok(Err(error)) => Err(TransportError::io("read", error)),
        }
    }

    /// Run `f` with the packet buffer locked.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut PacketBuffer) -> R) -> R {
        let mut buffer = self.packet_buffer.lock().expect("packet buffer poisoned");
        f(&mut buffer)
    }

    /// Write `bytes` fully to the socket.
    ///
    /// The byte count is registered as queued before the write-half lock is
    /// taken, so a concurrent reader observes pending output and yields.
    pub async fn flush(&self, bytes: &[u8]) -> TransportResult<()> {
        if self.is_shutdown() {
            return Err(TransportError::InvalidState(
                "transport is shut down".to_owned(),
            ));
        }

        self.queued_write_bytes
            .fetch_add(bytes.len(), Ordering::AcqRel);
        let result = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(bytes).await {
                Ok(()) => writer.flush().await,
                Err(error) => Err(error),
            }
        };
        self.queued_write_bytes
            .fetch_sub(bytes.len(), Ordering::AcqRel);

        result.map_err(|error| TransportError::io("write", error))
    }

    /// Bytes handed to [`flush`](Self::flush) that have not yet hit the wire.
    pub fn queued_write_byte_count(&self) -> usize {
        self.queued_write_bytes.load(Ordering::Acquire)
    }

    /// Tear the socket down. Safe to call from any task, any number of
    /// times; only the first call performs the shutdown.
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            tracing::debug!(%error, "socket shutdown failed");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    pub fn read_timeout(&self) -> Duration {
        *self.read_timeout.lock().expect("read timeout poisoned")
    }

    /// Adjust the reader poll window (the analogue of a socket read timeout).
    pub fn set_read_timeout(&self, timeout: Duration) {
        let timeout = if timeout.is_zero() {
            DEFAULT_READ_TIMEOUT
        } else {
            timeout
        };
        *self.read_timeout.lock().expect("read timeout poisoned") = timeout;
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("queued_write_bytes", &self.queued_write_byte_count())
            .field("is_shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
