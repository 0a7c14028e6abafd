use thiserror::Error;

/// Convenience result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Canonical error surface shared across the crate.
///
/// These never cross the public `execute()` boundary for ordinary network
/// failures: `HttpClient` maps them to an absent response and traces the
/// cause. They are the internal propagation currency.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    Io {
        context: &'static str,
        error: String,
    },

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Malformed http response: {0}")]
    HttpParse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TransportError {
    pub(crate) fn io(context: &'static str, error: impl ToString) -> Self {
        Self::Io {
            context,
            error: error.to_string(),
        }
    }
}

/// Which side of the websocket conversation this endpoint plays.
///
/// Client-mode peers mask every outgoing frame with a fresh random key;
/// server-mode peers send unmasked frames. The mode is fixed when the
/// connection is created and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

impl Mode {
    #[inline]
    pub fn masks_outgoing_frames(self) -> bool {
        matches!(self, Mode::Client)
    }
}
