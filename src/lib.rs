//! Client-side HTTP transport with an embedded RFC 6455 WebSocket engine.
//!
//! The crate does two related jobs:
//!
//! - execute HTTP requests with redirect chasing, per-request TLS trust
//!   configuration, and cancellation ([`HttpClient`] / [`HttpRequest`]);
//! - speak the websocket frame protocol over an upgraded socket
//!   ([`WebSocketConnection`]): fragment reassembly, incremental UTF-8
//!   validation, control-frame handling, close-code validation, masking,
//!   and keepalive pings.
//!
//! A request whose url starts with `ws://` or `wss://` (or that opts in via
//! [`HttpRequest::set_allow_websocket_upgrade`]) negotiates the upgrade; on
//! success the response carries a live [`WebSocketConnection`] instead of a
//! body, with handler slots fixed before the first frame is parsed:
//!
//! ```ignore
//! let mut request = HttpRequest::new("wss://example.test/feed");
//! request.set_websocket_options(WebSocketOptions {
//!     handlers: WebSocketHandlers::new()
//!         .on_text(|message| println!("{message}"))
//!         .on_close(|code, reason| println!("closed: {code} {reason}")),
//!     ..WebSocketOptions::default()
//! });
//!
//! let client = HttpClient::new();
//! let response = client.execute(request).await?;
//! let socket = response.web_socket().unwrap();
//! socket.send_text("hello").await;
//! ```

pub mod client;
pub mod core;
pub mod http;
pub mod tls;
pub mod transport;
pub mod ws;

pub use crate::client::HttpClient;
pub use crate::core::types::{Mode, TransportError, TransportResult};
pub use crate::http::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransaction, RedirectDecision, RedirectPolicy,
};
pub use crate::ws::{WebSocketConnection, WebSocketHandlers, WebSocketOptions};
