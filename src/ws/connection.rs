//! Live websocket connection.
//!
//! Composes the transport, the frame parser, the serialized writer and the
//! keepalive task. One dedicated reader task per connection drains the
//! packet buffer in receipt order; handler slots are fixed when the
//! connection is opened, so the reader never races a reconfiguration.
//!
//! Lifecycle is `Open -> Closing -> Closed`: any of peer close, protocol
//! violation, I/O failure or an explicit [`WebSocketConnection::close`]
//! starts the teardown, and the close handler fires exactly once no matter
//! how many paths race into it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::core::close::{CLOSE_NO_CLOSE, CLOSE_NO_CODE};
use crate::core::frame::Frame;
use crate::core::ping::KeepAlive;
use crate::core::types::Mode;
use crate::core::ClosePayload;
use crate::transport::{FillOutcome, MaybeTlsStream, Transport};
use crate::ws::reader::{FrameReader, ReaderEvent};
use crate::ws::writer::FrameWriter;

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_PACKET_BYTE_COUNT: usize = 8192;

/// Frames themselves may exceed a small message cap before the reader
/// rejects the message, so the decoder floor stays above control-frame and
/// header sizes.
const MIN_DECODE_CAP: usize = 4096;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type TextHandler = Arc<dyn Fn(String) + Send + Sync>;
type BinaryHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
type CloseHandler = Arc<dyn Fn(u16, String) + Send + Sync>;

/// Handler slots, configured once before the connection starts reading.
///
/// Every slot is optional; pings are answered by the engine whether or not
/// an observer is installed.
#[derive(Clone, Default)]
pub struct WebSocketHandlers {
    pub(crate) on_text: Option<TextHandler>,
    pub(crate) on_binary: Option<BinaryHandler>,
    pub(crate) on_ping: Option<BinaryHandler>,
    pub(crate) on_pong: Option<BinaryHandler>,
    pub(crate) on_close: Option<CloseHandler>,
}

impl WebSocketHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_text(mut self, handler: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_text = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_binary(mut self, handler: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_binary = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_ping(mut self, handler: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_ping = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_pong(mut self, handler: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_pong = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_close(mut self, handler: impl Fn(u16, String) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(handler));
        self
    }
}

/// Options for opening a connection over an already-accepted socket.
pub struct WebSocketOptions {
    pub max_packet_byte_count: usize,
    pub ping_interval: Option<Duration>,
    pub handlers: WebSocketHandlers,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            max_packet_byte_count: DEFAULT_MAX_PACKET_BYTE_COUNT,
            ping_interval: Some(crate::core::ping::DEFAULT_PING_INTERVAL),
            handlers: WebSocketHandlers::default(),
        }
    }
}

/// Handle to a live websocket connection.
///
/// Cheap to clone; the connection stays alive until the socket closes, even
/// if every handle is dropped, so unsolicited traffic keeps being consumed.
#[derive(Clone)]
pub struct WebSocketConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    mode: Mode,
    max_packet_byte_count: usize,
    transport: Arc<Transport>,
    writer: Mutex<FrameWriter>,
    handlers: WebSocketHandlers,
    close_notified: AtomicBool,
    ping_stop: StdMutex<Option<watch::Sender<bool>>>,
}

impl WebSocketConnection {
    /// Take ownership of a live transport (just upgraded, or just accepted)
    /// and start the reader and keepalive tasks.
    pub(crate) fn open(transport: Arc<Transport>, mode: Mode, options: WebSocketOptions) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ConnectionInner {
            id,
            mode,
            max_packet_byte_count: options.max_packet_byte_count,
            transport: Arc::clone(&transport),
            writer: Mutex::new(FrameWriter::new(transport, mode)),
            handlers: options.handlers,
            close_notified: AtomicBool::new(false),
            ping_stop: StdMutex::new(None),
        });

        debug!(id, ?mode, "websocket connection opened");

        inner.restart_ping_task(KeepAlive::from_interval(options.ping_interval));
        tokio::spawn(run_reader(Arc::clone(&inner)));

        Self { inner }
    }

    /// Wrap an already-accepted server-side socket.
    pub fn accept(stream: TcpStream, options: WebSocketOptions) -> Self {
        let transport = Arc::new(Transport::new(MaybeTlsStream::Plain(stream)));
        Self::open(transport, Mode::Server, options)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn max_packet_byte_count(&self) -> usize {
        self.inner.max_packet_byte_count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_shutdown()
    }

    /// Send a text message. A write failure tears the connection down; the
    /// close handler reports it rather than this call.
    pub async fn send_text(&self, message: &str) {
        let result = self.inner.writer.lock().await.write_text(message).await;
        self.inner.handle_write_result(result).await;
    }

    /// Send a binary message.
    pub async fn send_binary(&self, message: &[u8]) {
        let result = self.inner.writer.lock().await.write_binary(message).await;
        self.inner.handle_write_result(result).await;
    }

    /// Send a ping carrying `payload`.
    pub async fn send_ping(&self, payload: &[u8]) {
        let result = self.inner.writer.lock().await.write_ping(payload).await;
        self.inner.handle_write_result(result).await;
    }

    /// Change the keepalive cadence. `None` or zero stops pinging without
    /// touching the connection; a positive interval restarts the task.
    pub fn set_ping_interval(&self, interval: Option<Duration>) {
        self.inner
            .restart_ping_task(KeepAlive::from_interval(interval));
    }

    /// Adjust how long the reader blocks per read poll.
    pub fn set_socket_timeout(&self, timeout: Duration) {
        self.inner.transport.set_read_timeout(timeout);
    }

    /// Close the connection. Idempotent and safe to call concurrently with
    /// an active reader or writer.
    pub async fn close(&self) {
        self.inner.finish(CLOSE_NO_CODE, String::new()).await;
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionInner {
    /// Restart (or stop) the keepalive task.
    fn restart_ping_task(self: &Arc<Self>, keep_alive: KeepAlive) {
        let mut slot = self.ping_stop.lock().expect("ping task slot poisoned");
        if let Some(previous) = slot.take() {
            let _ = previous.send(true);
        }

        let Some(interval) = keep_alive.interval() else {
            return;
        };
        if self.transport.is_shutdown() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *slot = Some(stop_tx);
        tokio::spawn(run_keepalive(Arc::clone(self), keep_alive, interval, stop_rx));
    }

    async fn handle_write_result(self: &Arc<Self>, result: crate::core::TransportResult<()>) {
        if let Err(error) = result {
            debug!(id = self.id, %error, "websocket write failed");
            self.finish(CLOSE_NO_CODE, String::new()).await;
        }
    }

    /// Drive `Closing -> Closed`: stop keepalive, release the socket, and
    /// fire the close handler exactly once, off this task.
    async fn finish(self: &Arc<Self>, code: u16, reason: String) {
        {
            let mut slot = self.ping_stop.lock().expect("ping task slot poisoned");
            if let Some(stop) = slot.take() {
                let _ = stop.send(true);
            }
        }

        self.transport.shutdown().await;

        if !self.close_notified.swap(true, Ordering::AcqRel) {
            debug!(id = self.id, code, "websocket connection closed");
            if let Some(on_close) = self.handlers.on_close.clone() {
                tokio::spawn(async move {
                    on_close(code, reason);
                });
            }
        }
    }

    /// Send a close frame best-effort, then tear down.
    async fn close_with_code(self: &Arc<Self>, code: u16, reason: &str) {
        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write_close(code, reason).await
        };
        if let Err(error) = write_result {
            debug!(id = self.id, %error, "close frame could not be sent");
        }
        self.finish(code, reason.to_owned()).await;
    }

    /// React to one parsed frame. Returns `false` once the connection is
    /// closing and the reader should stop.
    async fn handle_event(self: &Arc<Self>, event: Option<ReaderEvent>) -> bool {
        match event {
            None => true,
            Some(ReaderEvent::Text(message)) => {
                if let Some(on_text) = &self.handlers.on_text {
                    on_text(message);
                }
                true
            }
            Some(ReaderEvent::Binary(message)) => {
                if let Some(on_binary) = &self.handlers.on_binary {
                    on_binary(message);
                }
                true
            }
            Some(ReaderEvent::Ping(payload)) => {
                let result = {
                    let mut writer = self.writer.lock().await;
                    writer.write_pong(&payload).await
                };
                if let Err(error) = result {
                    debug!(id = self.id, %error, "pong reply failed");
                    self.finish(CLOSE_NO_CODE, String::new()).await;
                    return false;
                }
                if let Some(on_ping) = &self.handlers.on_ping {
                    on_ping(payload);
                }
                true
            }
            Some(ReaderEvent::Pong(payload)) => {
                if let Some(on_pong) = &self.handlers.on_pong {
                    on_pong(payload);
                }
                true
            }
            Some(ReaderEvent::Close(ClosePayload { code, reason })) => {
                // Echo the close before releasing the socket (RFC 6455 5.5.1).
                self.close_with_code(code, &reason).await;
                false
            }
            Some(ReaderEvent::Violation { code, reason }) => {
                warn!(id = self.id, code, reason, "websocket protocol violation");
                self.close_with_code(code, reason).await;
                false
            }
        }
    }
}

/// Reader task: drain buffered frames, then poll the socket for more.
///
/// Buffered bytes are parsed before the first read so anything the http
/// layer left behind after the upgrade head is not stranded.
async fn run_reader(inner: Arc<ConnectionInner>) {
    let mut parser = FrameReader::new(inner.max_packet_byte_count);
    let decode_cap = inner.max_packet_byte_count.max(MIN_DECODE_CAP);

    'read: loop {
        // Consume every complete frame currently buffered.
        loop {
            let decoded = inner.transport.with_buffer(|buffer| {
                match Frame::decode(buffer.as_slice(), decode_cap) {
                    Ok(Some((frame, consumed))) => {
                        buffer.consume(consumed);
                        Ok(Some(frame))
                    }
                    Ok(None) => Ok(None),
                    Err(error) => Err(error),
                }
            });

            match decoded {
                Ok(Some(frame)) => {
                    let event = parser.on_frame(frame);
                    if !inner.handle_event(event).await {
                        break 'read;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    let (code, reason) = FrameReader::violation_for(&error);
                    warn!(id = inner.id, %error, "undecodable websocket frame");
                    inner.close_with_code(code, reason).await;
                    break 'read;
                }
            }
        }

        if inner.transport.is_shutdown() {
            inner.finish(CLOSE_NO_CODE, String::new()).await;
            break;
        }

        // Let queued outgoing frames reach the socket before blocking in
        // another read; heavy inbound traffic must not starve keepalive.
        if inner.transport.queued_write_byte_count() > 0 {
            tokio::task::yield_now().await;
        }

        match inner.transport.fill().await {
            Ok(FillOutcome::Idle) => {}
            Ok(FillOutcome::Data(_)) => {}
            Ok(FillOutcome::Eof) => {
                inner.finish(CLOSE_NO_CLOSE, String::new()).await;
                break;
            }
            Err(error) => {
                debug!(id = inner.id, %error, "websocket read failed");
                inner.finish(CLOSE_NO_CLOSE, String::new()).await;
                break;
            }
        }
    }
}

/// Keepalive task: one ping per interval until stopped or the write fails.
async fn run_keepalive(
    inner: Arc<ConnectionInner>,
    keep_alive: KeepAlive,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a fresh interval fires immediately; skip it so the
    // cadence starts one full interval from now.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow_and_update() {
                    break;
                }
                continue;
            }
        }

        if inner.transport.is_shutdown() {
            break;
        }

        let nonce = keep_alive.next_nonce();
        let result = {
            let mut writer = inner.writer.lock().await;
            writer.write_ping(&nonce).await
        };
        if let Err(error) = result {
            debug!(id = inner.id, %error, "keepalive ping failed");
            inner.finish(CLOSE_NO_CODE, String::new()).await;
            break;
        }
    }
}
