//! Close status codes (RFC 6455 section 7.4) and close payload handling.

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (shutdown).
pub const CLOSE_SHUTDOWN: u16 = 1001;
/// Protocol error.
pub const CLOSE_PROTOCOL: u16 = 1002;
/// Unacceptable data type.
pub const CLOSE_BAD_DATA: u16 = 1003;
/// Reserved, must not be sent.
pub const CLOSE_UNDEFINED: u16 = 1004;
/// No status code was present in the close frame.
pub const CLOSE_NO_CODE: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_NO_CLOSE: u16 = 1006;
/// Payload inconsistent with message type (e.g. malformed UTF-8).
pub const CLOSE_BAD_PAYLOAD: u16 = 1007;
/// Policy violation.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Message too large to process.
pub const CLOSE_MESSAGE_TOO_LARGE: u16 = 1009;
/// A required extension was not negotiated.
pub const CLOSE_REQUIRED_EXTENSION: u16 = 1010;
/// Unexpected server-side condition.
pub const CLOSE_SERVER_ERROR: u16 = 1011;
/// TLS handshake failure (never sent on the wire).
pub const CLOSE_FAILED_TLS_HANDSHAKE: u16 = 1015;

/// Whether a close code received on the wire is acceptable.
///
/// Rejected: anything below 1000, the reserved codes 1004/1005/1006, the
/// unassigned band (1011, 3000) exclusive, and everything from 5000 up.
/// The registered (3000-3999) and private (4000-4999) ranges pass.
pub fn is_valid_close_code(code: u16) -> bool {
    if code < CLOSE_NORMAL {
        return false;
    }
    if matches!(code, CLOSE_UNDEFINED | CLOSE_NO_CODE | CLOSE_NO_CLOSE) {
        return false;
    }
    if code > CLOSE_SERVER_ERROR && code < 3000 {
        return false;
    }
    code < 5000
}

/// Decoded payload of an inbound CLOSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePayload {
    pub code: u16,
    pub reason: String,
}

/// Why a CLOSE payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePayloadError {
    /// A one-byte payload cannot carry a status code.
    TruncatedCode,
    /// The carried status code is outside the acceptable set.
    InvalidCode(u16),
}

impl ClosePayload {
    /// Parse a CLOSE frame payload.
    ///
    /// An empty payload normalizes to [`CLOSE_NO_CODE`]. Two or more bytes
    /// carry a big-endian status code followed by an optional UTF-8 reason;
    /// a reason that fails UTF-8 validation is dropped silently (the close
    /// still proceeds with the carried code).
    pub fn parse(payload: &[u8]) -> Result<Self, ClosePayloadError> {
        match payload.len() {
            0 => Ok(Self {
                code: CLOSE_NO_CODE,
                reason: String::new(),
            }),
            1 => Err(ClosePayloadError::TruncatedCode),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !is_valid_close_code(code) {
                    return Err(ClosePayloadError::InvalidCode(code));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map(str::to_owned)
                    .unwrap_or_default();
                Ok(Self { code, reason })
            }
        }
    }

    /// Encode a code + reason into a CLOSE frame payload.
    ///
    /// [`CLOSE_NO_CODE`] encodes to an empty payload, matching how it was
    /// decoded; it must never appear on the wire.
    pub fn encode(code: u16, reason: &str) -> Vec<u8> {
        if code == CLOSE_NO_CODE {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2 + reason.len());
        out.extend_from_slice(&code.to_be_bytes());
        out.extend_from_slice(reason.as_bytes());
        out
    }
}
