//! One HTTP transaction: connect, send, parse, chase redirects, and either
//! read a body or hand the socket to a websocket connection.
//!
//! The transaction runs on the caller's task and produces exactly one
//! terminal outcome. Because it is built directly on [`Transport`], an
//! upgrade is a plain ownership transfer of the live socket: bytes the
//! server sent past the response head are already waiting in the packet
//! buffer when the websocket reader starts.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::core::types::{Mode, TransportError, TransportResult};
use crate::http::redirect::{RedirectDecision, RedirectPolicy};
use crate::http::request::HttpRequest;
use crate::http::response::{Headers, HttpResponse};
use crate::tls;
use crate::transport::{FillOutcome, MaybeTlsStream, Transport};
use crate::ws::handshake;
use crate::ws::WebSocketConnection;

const MAX_RESPONSE_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Executes one [`HttpRequest`] to completion.
pub struct HttpTransaction {
    request: HttpRequest,
    cancel_rx: watch::Receiver<bool>,
}

/// Response head plus the still-live connection it arrived on.
struct RawResponse {
    code: u16,
    message: String,
    headers: Headers,
    transport: Arc<Transport>,
}

impl HttpTransaction {
    pub fn new(request: HttpRequest, cancel_rx: watch::Receiver<bool>) -> Self {
        Self { request, cancel_rx }
    }

    /// Run the transaction. Exactly one of three outcomes: a response with a
    /// body, a response carrying a live websocket connection, or an error.
    pub async fn execute(mut self) -> TransportResult<HttpResponse> {
        let (mut current_url, sec_key) = self.prepare_initial_url();

        let policy = RedirectPolicy::new(
            self.request.follows_redirects(),
            self.request.max_redirect_count(),
        );
        let mut redirect_count = 0u32;

        loop {
            let raw = self.execute_once(&current_url).await?;

            let decision = policy.evaluate(
                &current_url,
                raw.code,
                raw.headers.first("location"),
                redirect_count,
            );
            match decision {
                RedirectDecision::Follow(next_url) => {
                    debug!(code = raw.code, from = %current_url, to = %next_url, "following redirect");
                    raw.transport.shutdown().await;
                    redirect_count += 1;
                    current_url = next_url;
                }
                RedirectDecision::Stop => {
                    return self.complete(raw, sec_key.as_deref()).await;
                }
            }
        }
    }

    /// Map `ws://`/`wss://` urls onto their http schemes and configure the
    /// upgrade negotiation headers, returning the generated key.
    fn prepare_initial_url(&mut self) -> (String, Option<String>) {
        let raw = self.request.url().to_owned();
        if let Some(rest) = raw.strip_prefix("wss://") {
            let key = handshake::configure_upgrade_request(&mut self.request);
            (format!("https://{rest}"), Some(key))
        } else if let Some(rest) = raw.strip_prefix("ws://") {
            let key = handshake::configure_upgrade_request(&mut self.request);
            (format!("http://{rest}"), Some(key))
        } else {
            (raw, None)
        }
    }

    /// One request/response exchange against a fresh connection.
    async fn execute_once(&mut self, hop_url: &str) -> TransportResult<RawResponse> {
        let target = append_query(hop_url, self.request.query_string());
        let url = Url::parse(&target).map_err(|error| {
            TransportError::InvalidUrl(format!("{target}: {error}"))
        })?;

        let scheme = url.scheme().to_owned();
        if scheme != "http" && scheme != "https" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {scheme}"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_owned()))?
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl("missing port".to_owned()))?;

        self.request.set_header("Origin", format!("{scheme}://{host}"));

        let tcp = self
            .cancellable(TcpStream::connect((host.as_str(), port)))
            .await?
            .map_err(|error| TransportError::ConnectionFailed(error.to_string()))?;

        let stream = if scheme == "https" {
            let connector = tls::connector(self.request.validates_ssl_certificates());
            let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                .map_err(|error| TransportError::InvalidUrl(error.to_string()))?;
            let tls_stream = self
                .cancellable(connector.connect(server_name, tcp))
                .await?
                .map_err(|error| TransportError::ConnectionFailed(error.to_string()))?;
            MaybeTlsStream::Tls(Box::new(tls_stream))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let transport = Arc::new(Transport::new(stream));

        let head = self.build_request_head(&url);
        transport.flush(&head).await?;

        let body = self.request.body();
        if self.request.method().sends_body() && !body.is_empty() {
            let body = body.to_vec();
            transport.flush(&body).await?;
        }

        let (code, message, headers) = self.read_response_head(&transport).await?;
        debug!(code, url = %url, "response head received");

        Ok(RawResponse {
            code,
            message,
            headers,
            transport,
        })
    }

    /// Serialize the request line and headers.
    fn build_request_head(&self, url: &Url) -> Vec<u8> {
        let mut target = url.path().to_owned();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut head = format!("{} {} HTTP/1.1\r\n", self.request.method(), target);

        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => head.push_str(&format!("Host: {host}:{port}\r\n")),
            None => head.push_str(&format!("Host: {host}\r\n")),
        }

        let cookies = self.request.cookies().join("; ");
        if !cookies.is_empty() {
            head.push_str(&format!("Cookie: {cookies}\r\n"));
        }

        for (name, value) in self.request.headers() {
            // Host and body framing are owned by the transaction.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }

        if self.request.method().sends_body() && !self.request.body().is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", self.request.body().len()));
        }
        if self.request.header("connection").is_none() {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("Cache-Control: no-cache\r\n\r\n");

        head.into_bytes()
    }

    /// Fill from the socket until a complete response head parses.
    async fn read_response_head(
        &mut self,
        transport: &Transport,
    ) -> TransportResult<(u16, String, Headers)> {
        loop {
            let parsed = transport.with_buffer(|buffer| {
                let data = buffer.as_slice();
                let mut storage = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
                let mut response = httparse::Response::new(&mut storage);
                match response.parse(data) {
                    Ok(httparse::Status::Complete(head_len)) => {
                        let code = response.code.unwrap_or_default();
                        let message = response.reason.unwrap_or_default().to_owned();
                        let mut headers = Headers::new();
                        for header in response.headers.iter() {
                            headers.append(
                                header.name,
                                String::from_utf8_lossy(header.value).into_owned(),
                            );
                        }
                        buffer.consume(head_len);
                        Ok(Some((code, message, headers)))
                    }
                    Ok(httparse::Status::Partial) => {
                        if data.len() > MAX_HEAD_BYTES {
                            Err(TransportError::HttpParse(
                                "response head too large".to_owned(),
                            ))
                        } else {
                            Ok(None)
                        }
                    }
                    Err(error) => Err(TransportError::HttpParse(error.to_string())),
                }
            })?;

            if let Some(head) = parsed {
                return Ok(head);
            }

            match self.cancellable(transport.fill()).await?? {
                FillOutcome::Idle | FillOutcome::Data(_) => {}
                FillOutcome::Eof => {
                    return Err(TransportError::HttpParse(
                        "connection closed before response head".to_owned(),
                    ));
                }
            }
        }
    }

    /// Turn the raw head into the terminal response: either detach the
    /// transport into a websocket connection or read the body and close.
    async fn complete(
        &mut self,
        raw: RawResponse,
        sec_key: Option<&str>,
    ) -> TransportResult<HttpResponse> {
        let upgraded = self.request.allows_websocket_upgrade()
            && raw.headers.contains_value("upgrade", "websocket");

        if upgraded {
            if let Some(key) = sec_key {
                let expected = handshake::derive_accept_key(key);
                match raw.headers.first("sec-websocket-accept") {
                    Some(accept) if accept.trim() == expected => {}
                    other => warn!(
                        accept = ?other,
                        "sec-websocket-accept mismatch; proceeding with upgrade"
                    ),
                }
            }

            let options = self.request.take_websocket_options();
            let connection = WebSocketConnection::open(raw.transport, Mode::Client, options);
            return Ok(HttpResponse {
                response_code: raw.code,
                response_message: raw.message,
                headers: raw.headers,
                body: None,
                web_socket: Some(connection),
            });
        }

        let body = self.read_body(&raw).await?;
        raw.transport.shutdown().await;

        Ok(HttpResponse {
            response_code: raw.code,
            response_message: raw.message,
            headers: raw.headers,
            body: Some(body),
            web_socket: None,
        })
    }

    /// Read the response body according to its framing.
    async fn read_body(&mut self, raw: &RawResponse) -> TransportResult<Vec<u8>> {
        // 101 without an accepted upgrade means the handshake went sideways;
        // the stream will never end, so only drain what already arrived.
        if raw.code == 101 {
            warn!("unexpected 101 response without websocket upgrade");
            return Ok(raw.transport.with_buffer(|buffer| buffer.drain()));
        }

        if self.request.method() == crate::http::HttpMethod::Head
            || raw.code == 204
            || raw.code == 304
        {
            return Ok(Vec::new());
        }

        if let Some(value) = raw.headers.first("content-length") {
            let expected: usize = value.trim().parse().map_err(|_| {
                TransportError::HttpParse(format!("bad content-length: {value}"))
            })?;
            return self.read_exact_body(raw, expected).await;
        }

        if raw.headers.contains_value("transfer-encoding", "chunked") {
            return self.read_chunked_body(raw).await;
        }

        self.read_body_to_eof(raw).await
    }

    async fn read_exact_body(
        &mut self,
        raw: &RawResponse,
        expected: usize,
    ) -> TransportResult<Vec<u8>> {
        loop {
            let body = raw.transport.with_buffer(|buffer| {
                if buffer.len() >= expected {
                    let mut bytes = buffer.drain();
                    bytes.truncate(expected);
                    Some(bytes)
                } else {
                    None
                }
            });
            if let Some(body) = body {
                return Ok(body);
            }

            match self.cancellable(raw.transport.fill()).await?? {
                FillOutcome::Idle | FillOutcome::Data(_) => {}
                FillOutcome::Eof => {
                    return Err(TransportError::HttpParse(
                        "connection closed mid-body".to_owned(),
                    ));
                }
            }
        }
    }

    async fn read_chunked_body(&mut self, raw: &RawResponse) -> TransportResult<Vec<u8>> {
        loop {
            let decoded = raw
                .transport
                .with_buffer(|buffer| match decode_chunked(buffer.as_slice()) {
                    Ok(Some((body, consumed))) => {
                        buffer.consume(consumed);
                        Ok(Some(body))
                    }
                    Ok(None) => Ok(None),
                    Err(error) => Err(error),
                })?;
            if let Some(body) = decoded {
                return Ok(body);
            }

            match self.cancellable(raw.transport.fill()).await?? {
                FillOutcome::Idle | FillOutcome::Data(_) => {}
                FillOutcome::Eof => {
                    return Err(TransportError::HttpParse(
                        "connection closed mid-chunk".to_owned(),
                    ));
                }
            }
        }
    }

    async fn read_body_to_eof(&mut self, raw: &RawResponse) -> TransportResult<Vec<u8>> {
        loop {
            match self.cancellable(raw.transport.fill()).await?? {
                FillOutcome::Idle | FillOutcome::Data(_) => {}
                FillOutcome::Eof => {
                    return Ok(raw.transport.with_buffer(|buffer| buffer.drain()));
                }
            }
        }
    }

    /// Race `operation` against a cancel signal. Cancellation drops the
    /// connection, so anything blocked on it unblocks immediately.
    async fn cancellable<T>(
        &mut self,
        operation: impl Future<Output = T>,
    ) -> TransportResult<T> {
        let mut cancel_rx = self.cancel_rx.clone();
        tokio::select! {
            () = wait_for_cancel(&mut cancel_rx) => Err(TransportError::Cancelled),
            value = operation => Ok(value),
        }
    }
}

async fn wait_for_cancel(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone: this request can no longer be cancelled.
        std::future::pending::<()>().await;
    }
}

fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        url.to_owned()
    } else if url.contains('?') {
        format!("{url}&{query}")
    } else {
        format!("{url}?{query}")
    }
}

/// Decode a complete chunked body from `data`, or report that more input is
/// needed. Returns the body and the total encoded length consumed.
fn decode_chunked(data: &[u8]) -> TransportResult<Option<(Vec<u8>, usize)>> {
    let mut body = Vec::new();
    let mut pos = 0usize;

    loop {
        let Some(line_len) = find_crlf(&data[pos..]) else {
            return Ok(None);
        };
        let size_line = &data[pos..pos + line_len];
        let size_text = std::str::from_utf8(size_line)
            .map_err(|_| TransportError::HttpParse("bad chunk size line".to_owned()))?;
        let size_text = size_text.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_text, 16)
            .map_err(|_| TransportError::HttpParse(format!("bad chunk size: {size_text}")))?;

        let data_start = pos + line_len + 2;

        if chunk_size == 0 {
            // Skip optional trailer lines up to the blank terminator.
            let mut cursor = data_start;
            loop {
                let Some(trailer_len) = find_crlf(&data[cursor.min(data.len())..]) else {
                    return Ok(None);
                };
                cursor += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok(Some((body, cursor)));
                }
            }
        }

        if data.len() < data_start + chunk_size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&data[data_start..data_start + chunk_size]);
        if &data[data_start + chunk_size..data_start + chunk_size + 2] != b"\r\n" {
            return Err(TransportError::HttpParse(
                "chunk missing trailing crlf".to_owned(),
            ));
        }
        pos = data_start + chunk_size + 2;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|pair| pair == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_appending_never_duplicates_the_separator() {
        assert_eq!(append_query("http://a.test/x", ""), "http://a.test/x");
        assert_eq!(append_query("http://a.test/x", "k=v"), "http://a.test/x?k=v");
        assert_eq!(
            append_query("http://a.test/x?k=v", "j=w"),
            "http://a.test/x?k=v&j=w"
        );
    }

    #[test]
    fn chunked_decoding_handles_split_input() {
        let encoded = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        for cut in 0..encoded.len() {
            let result = decode_chunked(&encoded[..cut]).unwrap();
            assert!(result.is_none(), "cut at {cut} should be incomplete");
        }
        let (body, consumed) = decode_chunked(encoded).unwrap().unwrap();
        assert_eq!(body, b"Wikipedia");
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn chunked_decoding_skips_extensions_and_trailers() {
        let encoded = b"3;ext=1\r\nabc\r\n0\r\nTrailer: x\r\n\r\nleftover";
        let (body, consumed) = decode_chunked(encoded).unwrap().unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(&encoded[consumed..], b"leftover");
    }

    #[test]
    fn malformed_chunk_sizes_error() {
        assert!(decode_chunked(b"zz\r\nabc\r\n").is_err());
        assert!(decode_chunked(b"3\r\nabcXX").is_err());
    }
}
