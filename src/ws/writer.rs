//! Outgoing frame serialization.
//!
//! Builds single, unfragmented frames (FIN always set) and pushes them
//! through the transport. Client-mode connections mask every frame with a
//! fresh random key; server-mode frames go out unmasked. The connection
//! wraps the writer in one mutex so the keepalive task and application
//! sends can never interleave a frame.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::core::frame::{Frame, new_mask_key};
use crate::core::types::{Mode, TransportResult};
use crate::core::ClosePayload;
use crate::transport::Transport;

pub(crate) struct FrameWriter {
    transport: Arc<Transport>,
    mode: Mode,
}

impl FrameWriter {
    pub(crate) fn new(transport: Arc<Transport>, mode: Mode) -> Self {
        Self { transport, mode }
    }

    pub(crate) async fn write_text(&mut self, message: &str) -> TransportResult<()> {
        self.write_frame(Frame::text(Bytes::copy_from_slice(message.as_bytes())))
            .await
    }

    pub(crate) async fn write_binary(&mut self, message: &[u8]) -> TransportResult<()> {
        self.write_frame(Frame::binary(Bytes::copy_from_slice(message)))
            .await
    }

    pub(crate) async fn write_ping(&mut self, payload: &[u8]) -> TransportResult<()> {
        self.write_frame(Frame::ping(Bytes::copy_from_slice(payload)))
            .await
    }

    pub(crate) async fn write_pong(&mut self, payload: &[u8]) -> TransportResult<()> {
        self.write_frame(Frame::pong(Bytes::copy_from_slice(payload)))
            .await
    }

    pub(crate) async fn write_close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        let payload = ClosePayload::encode(code, reason);
        self.write_frame(Frame::close(payload)).await
    }

    async fn write_frame(&mut self, mut frame: Frame) -> TransportResult<()> {
        if self.mode.masks_outgoing_frames() {
            frame = frame.masked(new_mask_key());
        }

        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded);
        self.transport.flush(&encoded).await
    }
}
