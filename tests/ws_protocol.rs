//! End-to-end websocket tests: a raw RFC 6455 mock server on one side, the
//! full client stack (upgrade included) on the other.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use sockwire::core::close::{CLOSE_MESSAGE_TOO_LARGE, CLOSE_NORMAL, CLOSE_PROTOCOL};
use sockwire::core::frame::{Frame, Opcode};
use sockwire::ws::handshake;
use sockwire::{HttpClient, HttpRequest, WebSocketConnection, WebSocketHandlers, WebSocketOptions};

const WAIT: Duration = Duration::from_secs(5);

/// Accept one TCP connection and complete the server side of the upgrade.
async fn accept_upgrade(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("accept");

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let count = stream.read(&mut byte).await.expect("read upgrade head");
        assert!(count > 0, "client closed during the upgrade request");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).expect("ascii head");
    assert!(head.contains("Upgrade: websocket"));
    assert!(head.contains("Sec-WebSocket-Version: 13"));

    let key = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_owned())
        })
        .expect("upgrade request must carry a key");

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        handshake::derive_accept_key(&key)
    );
    stream
        .write_all(response.as_bytes())
        .await
        .expect("write 101");
    stream
}

/// Read one frame from the raw server-side socket.
async fn read_frame(stream: &mut TcpStream, residue: &mut Vec<u8>) -> Frame {
    loop {
        if let Some((frame, consumed)) = Frame::decode(residue, 1 << 20).expect("decodable frame") {
            residue.drain(..consumed);
            return frame;
        }
        let mut chunk = [0u8; 4096];
        let count = stream.read(&mut chunk).await.expect("read frame bytes");
        assert!(count > 0, "client closed while a frame was expected");
        residue.extend_from_slice(&chunk[..count]);
    }
}

async fn write_frame(stream: &mut TcpStream, frame: Frame) {
    let mut encoded = BytesMut::new();
    frame.encode(&mut encoded);
    stream.write_all(&encoded).await.expect("write frame");
}

/// Write raw header bytes, bypassing `Frame`'s invariants.
async fn write_raw(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("write raw bytes");
}

struct Client {
    connection: WebSocketConnection,
    texts: mpsc::UnboundedReceiver<String>,
    binaries: mpsc::UnboundedReceiver<Vec<u8>>,
    closes: mpsc::UnboundedReceiver<(u16, String)>,
}

/// Drive the full client stack through an upgrade against `url`.
async fn connect(url: String, options_tweak: impl FnOnce(&mut WebSocketOptions)) -> Client {
    let (text_tx, texts) = mpsc::unbounded_channel();
    let (binary_tx, binaries) = mpsc::unbounded_channel();
    let (close_tx, closes) = mpsc::unbounded_channel();

    let mut options = WebSocketOptions {
        ping_interval: None,
        handlers: WebSocketHandlers::new()
            .on_text(move |message| {
                text_tx.send(message).ok();
            })
            .on_binary(move |message| {
                binary_tx.send(message.to_vec()).ok();
            })
            .on_close(move |code, reason| {
                close_tx.send((code, reason)).ok();
            }),
        ..WebSocketOptions::default()
    };
    options_tweak(&mut options);

    let mut request = HttpRequest::new(url);
    request.set_websocket_options(options);

    let client = HttpClient::new();
    let mut response = client
        .execute(request)
        .await
        .expect("upgrade transaction should succeed");
    assert_eq!(response.response_code(), 101);
    assert!(response.body().is_none(), "upgraded responses carry no body");
    let connection = response.take_web_socket().expect("upgraded connection");

    Client {
        connection,
        texts,
        binaries,
        closes,
    }
}

async fn bind_ws() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    (listener, format!("ws://{address}/feed"))
}

async fn recv<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("callback channel closed")
}

#[tokio::test]
async fn upgrade_then_exchange_messages() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();

        write_frame(&mut stream, Frame::text("welcome")).await;

        let inbound = read_frame(&mut stream, &mut residue).await;
        assert_eq!(inbound.opcode, Opcode::Text);
        assert!(
            inbound.mask.is_some(),
            "client-mode frames must arrive masked"
        );
        assert_eq!(inbound.payload.as_ref(), b"thanks");

        write_frame(&mut stream, Frame::binary(vec![1u8, 2, 3])).await;
        stream
    });

    let mut client = connect(url, |_| {}).await;
    assert_eq!(recv(&mut client.texts).await, "welcome");

    client.connection.send_text("thanks").await;
    assert_eq!(recv(&mut client.binaries).await, vec![1u8, 2, 3]);

    let _stream = server.await.expect("server");
    client.connection.close().await;
    let (code, _) = recv(&mut client.closes).await;
    assert_eq!(code, sockwire::core::close::CLOSE_NO_CODE);
}

#[tokio::test]
async fn fragmented_text_reassembles_across_the_wire() {
    let (listener, url) = bind_ws().await;

    tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        // "caf" + "é" split mid-codepoint across continuations.
        write_frame(&mut stream, Frame::new(false, Opcode::Text, b"caf".to_vec())).await;
        write_frame(&mut stream, Frame::new(false, Opcode::Continuation, vec![0xC3])).await;
        write_frame(&mut stream, Frame::new(true, Opcode::Continuation, vec![0xA9])).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = connect(url, |_| {}).await;
    assert_eq!(recv(&mut client.texts).await, "café");
}

#[tokio::test]
async fn ping_is_answered_with_matching_pong() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();

        write_frame(&mut stream, Frame::ping("nonce-42")).await;
        let pong = read_frame(&mut stream, &mut residue).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload.as_ref(), b"nonce-42");
    });

    let _client = connect(url, |_| {}).await;
    tokio::time::timeout(WAIT, server)
        .await
        .expect("pong should arrive promptly")
        .expect("server");
}

#[tokio::test]
async fn peer_close_fires_callback_once_with_code_and_reason() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();

        let mut payload = CLOSE_NORMAL.to_be_bytes().to_vec();
        payload.extend_from_slice(b"done");
        write_frame(&mut stream, Frame::close(payload)).await;

        // The client echoes the close before tearing down.
        let echo = read_frame(&mut stream, &mut residue).await;
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(&echo.payload[..2], &CLOSE_NORMAL.to_be_bytes());
    });

    let mut client = connect(url, |_| {}).await;
    let (code, reason) = recv(&mut client.closes).await;
    assert_eq!(code, CLOSE_NORMAL);
    assert_eq!(reason, "done");

    // Explicitly closing again must not re-fire the callback.
    client.connection.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.closes.try_recv().is_err());
    assert!(client.connection.is_closed());

    server.await.expect("server");
}

#[tokio::test]
async fn reserved_bits_trigger_protocol_error_close() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();

        // FIN + RSV1 + text opcode, empty payload.
        write_raw(&mut stream, &[0xC1, 0x00]).await;

        let close = read_frame(&mut stream, &mut residue).await;
        assert_eq!(close.opcode, Opcode::Close);
        assert_eq!(&close.payload[..2], &CLOSE_PROTOCOL.to_be_bytes());
    });

    let mut client = connect(url, |_| {}).await;
    let (code, _) = recv(&mut client.closes).await;
    assert_eq!(code, CLOSE_PROTOCOL);

    server.await.expect("server");
}

#[tokio::test]
async fn oversized_binary_aggregate_closes_1009() {
    let (listener, url) = bind_ws().await;

    let server = tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();

        write_frame(&mut stream, Frame::new(false, Opcode::Binary, vec![0u8; 100])).await;
        write_frame(
            &mut stream,
            Frame::new(true, Opcode::Continuation, vec![0u8; 100]),
        )
        .await;

        let close = read_frame(&mut stream, &mut residue).await;
        assert_eq!(close.opcode, Opcode::Close);
        assert_eq!(&close.payload[..2], &CLOSE_MESSAGE_TOO_LARGE.to_be_bytes());
    });

    let mut client = connect(url, |options| options.max_packet_byte_count = 128).await;
    let (code, _) = recv(&mut client.closes).await;
    assert_eq!(code, CLOSE_MESSAGE_TOO_LARGE);

    // The connection is gone; nothing delivered, nothing further processed.
    assert!(client.binaries.try_recv().is_err());
    assert!(client.connection.is_closed());

    server.await.expect("server");
}

#[tokio::test]
async fn keepalive_pings_arrive_on_schedule_and_stop_when_disabled() {
    let (listener, url) = bind_ws().await;

    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        let mut residue = Vec::new();
        loop {
            let frame = read_frame(&mut stream, &mut residue).await;
            if frame.opcode == Opcode::Ping {
                assert_eq!(frame.payload.len(), 8, "pings carry an 8-byte nonce");
                ping_tx.send(()).ok();
            }
        }
    });

    let client = connect(url, |options| {
        options.ping_interval = Some(Duration::from_millis(50));
    })
    .await;

    // At least two scheduled pings.
    tokio::time::timeout(WAIT, ping_rx.recv())
        .await
        .expect("first keepalive ping")
        .unwrap();
    tokio::time::timeout(WAIT, ping_rx.recv())
        .await
        .expect("second keepalive ping")
        .unwrap();

    // Disabling stops the schedule without closing the connection.
    client.connection.set_ping_interval(None);
    tokio::time::sleep(Duration::from_millis(60)).await;
    while ping_rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        ping_rx.try_recv().is_err(),
        "no pings may arrive after the keepalive is disabled"
    );
    assert!(!client.connection.is_closed());
}

#[tokio::test]
async fn pong_callback_observes_unsolicited_pongs() {
    let (listener, url) = bind_ws().await;

    tokio::spawn(async move {
        let mut stream = accept_upgrade(&listener).await;
        write_frame(&mut stream, Frame::pong("unsolicited")).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel();
    let _client = connect(url, move |options| {
        options.handlers = std::mem::take(&mut options.handlers).on_pong(move |payload| {
            pong_tx.send(payload.to_vec()).ok();
        });
    })
    .await;

    let payload = tokio::time::timeout(WAIT, pong_rx.recv())
        .await
        .expect("pong callback")
        .unwrap();
    assert_eq!(payload, b"unsolicited");
}

#[tokio::test]
async fn server_mode_echo_round_trip() {
    // Full engine on both ends: the accepted socket is wrapped in a
    // server-mode connection that echoes text back unmasked.
    let (listener, url) = bind_ws().await;

    tokio::spawn(async move {
        let stream = accept_upgrade(&listener).await;

        let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<String>();
        let server_side = WebSocketConnection::accept(
            stream,
            WebSocketOptions {
                ping_interval: None,
                handlers: WebSocketHandlers::new().on_text(move |message| {
                    echo_tx.send(message).ok();
                }),
                ..WebSocketOptions::default()
            },
        );
        assert_eq!(server_side.mode(), sockwire::Mode::Server);

        while let Some(message) = echo_rx.recv().await {
            server_side.send_text(&format!("echo: {message}")).await;
        }
    });

    let mut client = connect(url, |_| {}).await;
    client.connection.send_text("ahoy").await;
    assert_eq!(recv(&mut client.texts).await, "echo: ahoy");
}

#[tokio::test]
async fn abrupt_disconnect_surfaces_no_close_code() {
    let (listener, url) = bind_ws().await;

    tokio::spawn(async move {
        let stream = accept_upgrade(&listener).await;
        drop(stream);
    });

    let mut client = connect(url, |_| {}).await;
    let (code, _) = recv(&mut client.closes).await;
    assert_eq!(code, sockwire::core::close::CLOSE_NO_CLOSE);
}
