//! Client-side upgrade negotiation helpers (RFC 6455 section 4).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::http::HttpRequest;

/// Concatenated with the client key before hashing (RFC 6455 section 1.3).
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version advertised in `Sec-WebSocket-Version`.
pub const WEBSOCKET_VERSION: &str = "13";

/// Generate a fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn new_sec_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn derive_accept_key(sec_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(sec_key.as_bytes());
    sha1.update(GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// Configure `request` for a websocket upgrade and return the generated key.
///
/// Sets the upgrade headers the server expects: `Upgrade`, `Connection`, the
/// protocol version, a fresh key, and the advertised (but un-negotiated)
/// permessage-deflate extension.
pub fn configure_upgrade_request(request: &mut HttpRequest) -> String {
    let sec_key = new_sec_key();

    request.set_allow_websocket_upgrade(true);
    request.set_header("Upgrade", "websocket");
    request.set_header("Connection", "upgrade");
    request.set_header("Sec-WebSocket-Version", WEBSOCKET_VERSION);
    request.set_header("Sec-WebSocket-Key", &sec_key);
    request.set_header(
        "Sec-WebSocket-Extensions",
        "permessage-deflate; client_max_window_bits",
    );

    sec_key
}
