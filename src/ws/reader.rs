//! Continuation-tracking frame state machine.
//!
//! [`FrameReader`] consumes decoded frames in receipt order, reassembles
//! fragmented messages, and reduces each frame to at most one
//! [`ReaderEvent`]. It performs no I/O: the connection's reader task feeds
//! it from the packet buffer and acts on the events (dispatching callbacks,
//! answering pings, driving shutdown on violations).
//!
//! Validation order is fixed: reserved bits first, then the control-frame
//! size limit, then everything opcode-specific.

use bytes::Bytes;

use crate::core::close::{CLOSE_BAD_PAYLOAD, CLOSE_MESSAGE_TOO_LARGE, CLOSE_PROTOCOL};
use crate::core::frame::{Frame, FrameError, Opcode};
use crate::core::{ClosePayload, ClosePayloadError};

const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// What a consumed frame amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReaderEvent {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    /// The peer closed with a valid (normalized) code.
    Close(ClosePayload),
    /// A protocol violation; close with `code` and stop parsing.
    Violation { code: u16, reason: &'static str },
}

/// Which message type a continuation would extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuationState {
    Idle,
    InText,
    InBinary,
}

pub(crate) struct FrameReader {
    state: ContinuationState,
    utf8: Utf8Accumulator,
    aggregate: Vec<u8>,
    max_packet_byte_count: usize,
}

impl FrameReader {
    pub(crate) fn new(max_packet_byte_count: usize) -> Self {
        Self {
            state: ContinuationState::Idle,
            utf8: Utf8Accumulator::new(max_packet_byte_count),
            aggregate: Vec::new(),
            max_packet_byte_count,
        }
    }

    /// Close code and reason for a frame that could not be decoded at all.
    pub(crate) fn violation_for(error: &FrameError) -> (u16, &'static str) {
        match error {
            FrameError::UnknownOpcode(_) => (CLOSE_PROTOCOL, "bad opcode"),
            FrameError::PayloadTooLarge { .. } => (CLOSE_MESSAGE_TOO_LARGE, "frame too large"),
        }
    }

    /// Feed one frame through the state machine.
    pub(crate) fn on_frame(&mut self, frame: Frame) -> Option<ReaderEvent> {
        if frame.rsv != 0 {
            return Some(self.violation(CLOSE_PROTOCOL, "rsv bits set"));
        }

        if frame.opcode.is_control() {
            if frame.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Some(self.violation(CLOSE_PROTOCOL, "control frame too large"));
            }
            if !frame.fin {
                return Some(self.violation(CLOSE_PROTOCOL, "fragmented control frame"));
            }
            // Control frames are handled immediately and never disturb an
            // in-progress continuation.
            return match frame.opcode {
                Opcode::Ping => Some(ReaderEvent::Ping(frame.payload)),
                Opcode::Pong => Some(ReaderEvent::Pong(frame.payload)),
                _ => Some(self.on_close_frame(&frame.payload)),
            };
        }

        match frame.opcode {
            Opcode::Text => self.on_text(frame),
            Opcode::Binary => self.on_binary(frame),
            Opcode::Continuation => self.on_continuation(frame),
            _ => unreachable!("control opcodes handled above"),
        }
    }

    fn on_close_frame(&mut self, payload: &[u8]) -> ReaderEvent {
        match ClosePayload::parse(payload) {
            Ok(close) => ReaderEvent::Close(close),
            Err(ClosePayloadError::TruncatedCode) => {
                self.violation(CLOSE_PROTOCOL, "invalid close payload length of 1")
            }
            Err(ClosePayloadError::InvalidCode(_)) => {
                self.violation(CLOSE_PROTOCOL, "invalid close code")
            }
        }
    }

    fn on_text(&mut self, frame: Frame) -> Option<ReaderEvent> {
        if self.state != ContinuationState::Idle {
            return Some(self.violation(CLOSE_PROTOCOL, "expected continuation"));
        }

        match self.utf8.append(&frame.payload) {
            Err(Utf8Error::Invalid) => {
                return Some(self.violation(CLOSE_BAD_PAYLOAD, "invalid utf-8"));
            }
            Err(Utf8Error::TooLarge) => {
                return Some(self.violation(CLOSE_MESSAGE_TOO_LARGE, "text message too large"));
            }
            Ok(()) => {}
        }

        if frame.fin {
            self.finish_text()
        } else {
            self.state = ContinuationState::InText;
            None
        }
    }

    fn on_binary(&mut self, frame: Frame) -> Option<ReaderEvent> {
        if self.state != ContinuationState::Idle {
            return Some(self.violation(CLOSE_PROTOCOL, "expected continuation"));
        }

        if frame.payload.len() > self.max_packet_byte_count {
            return Some(self.violation(CLOSE_MESSAGE_TOO_LARGE, "binary message too large"));
        }

        if frame.fin {
            Some(ReaderEvent::Binary(frame.payload))
        } else {
            self.state = ContinuationState::InBinary;
            self.aggregate.extend_from_slice(&frame.payload);
            None
        }
    }

    fn on_continuation(&mut self, frame: Frame) -> Option<ReaderEvent> {
        match self.state {
            ContinuationState::Idle => Some(self.violation(CLOSE_PROTOCOL, "bad continuation")),
            ContinuationState::InText => {
                match self.utf8.append(&frame.payload) {
                    Err(Utf8Error::Invalid) => {
                        return Some(self.violation(CLOSE_BAD_PAYLOAD, "invalid utf-8"));
                    }
                    Err(Utf8Error::TooLarge) => {
                        return Some(
                            self.violation(CLOSE_MESSAGE_TOO_LARGE, "text message too large"),
                        );
                    }
                    Ok(()) => {}
                }
                if frame.fin {
                    self.state = ContinuationState::Idle;
                    self.finish_text()
                } else {
                    None
                }
            }
            ContinuationState::InBinary => {
                if self.aggregate.len() + frame.payload.len() > self.max_packet_byte_count {
                    return Some(self.violation(CLOSE_MESSAGE_TOO_LARGE, "binary message too large"));
                }
                self.aggregate.extend_from_slice(&frame.payload);
                if frame.fin {
                    self.state = ContinuationState::Idle;
                    let message = std::mem::take(&mut self.aggregate);
                    Some(ReaderEvent::Binary(Bytes::from(message)))
                } else {
                    None
                }
            }
        }
    }

    fn finish_text(&mut self) -> Option<ReaderEvent> {
        match self.utf8.finish() {
            Ok(text) => Some(ReaderEvent::Text(text)),
            Err(()) => Some(self.violation(CLOSE_BAD_PAYLOAD, "invalid utf-8")),
        }
    }

    /// Record a violation, dropping any partial message.
    fn violation(&mut self, code: u16, reason: &'static str) -> ReaderEvent {
        self.state = ContinuationState::Idle;
        self.utf8.reset();
        self.aggregate.clear();
        ReaderEvent::Violation { code, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Utf8Error {
    Invalid,
    TooLarge,
}

/// Incremental UTF-8 validator.
///
/// Fragment boundaries may fall inside a multi-byte sequence, so up to three
/// trailing bytes are carried between appends. `finish` fails if a sequence
/// is still open when the final fragment ends.
struct Utf8Accumulator {
    text: String,
    pending: [u8; 4],
    pending_len: usize,
    appended_bytes: usize,
    max_bytes: usize,
}

impl Utf8Accumulator {
    fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            pending: [0; 4],
            pending_len: 0,
            appended_bytes: 0,
            max_bytes,
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Utf8Error> {
        self.appended_bytes += bytes.len();
        if self.appended_bytes > self.max_bytes {
            self.reset();
            return Err(Utf8Error::TooLarge);
        }

        let owned;
        let input: &[u8] = if self.pending_len > 0 {
            let mut combined = Vec::with_capacity(self.pending_len + bytes.len());
            combined.extend_from_slice(&self.pending[..self.pending_len]);
            combined.extend_from_slice(bytes);
            self.pending_len = 0;
            owned = combined;
            &owned
        } else {
            bytes
        };

        match std::str::from_utf8(input) {
            Ok(valid) => {
                self.text.push_str(valid);
                Ok(())
            }
            Err(error) => {
                let valid_len = error.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&input[..valid_len]) {
                    self.text.push_str(valid);
                }
                match error.error_len() {
                    // A wrong byte mid-sequence can never become valid.
                    Some(_) => {
                        self.reset();
                        Err(Utf8Error::Invalid)
                    }
                    // The tail is a prefix of a multi-byte sequence; hold it
                    // for the next fragment.
                    None => {
                        let tail = &input[valid_len..];
                        self.pending[..tail.len()].copy_from_slice(tail);
                        self.pending_len = tail.len();
                        Ok(())
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> Result<String, ()> {
        if self.pending_len > 0 {
            self.reset();
            return Err(());
        }
        self.appended_bytes = 0;
        Ok(std::mem::take(&mut self.text))
    }

    fn reset(&mut self) {
        self.text.clear();
        self.pending_len = 0;
        self.appended_bytes = 0;
    }
}
