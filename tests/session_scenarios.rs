//! Live-Session Integration Scenarios
//!
//! Runs the client against an in-process mock provider: a listener whose
//! first connection answers the auth request and whose later connections
//! complete WebSocket handshakes. Covers registry replay on reconnect,
//! graceful stop, dispatch order, and terminal server closes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use intrinio_realtime::{
    Client, Config, Provider, QuoteKind, SessionState, StreamMessage, SubProvider, Trade, codec,
};

const WAIT: Duration = Duration::from_secs(5);

/// Route library logs through `RUST_LOG` while tests run.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

// =============================================================================
// Mock Provider
// =============================================================================

/// One accepted WebSocket connection, seen from the server side.
struct WsConn {
    incoming: mpsc::UnboundedReceiver<Message>,
    outgoing: mpsc::UnboundedSender<Message>,
}

/// Mock provider: first connection serves the auth token over HTTP, every
/// later connection is a WebSocket.
struct MockFeedServer {
    host: String,
    connections: mpsc::UnboundedReceiver<WsConn>,
}

async fn start_mock_server() -> MockFeedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (conn_tx, connections) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut served_auth = false;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };

            if !served_auth {
                served_auth = true;
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let body = "test-session-token";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                continue;
            }

            let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (mut sink, mut source) = socket.split();
            let (in_tx, incoming) = mpsc::unbounded_channel();
            let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Message>();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = source.next() => match message {
                            Some(Ok(message)) => {
                                if in_tx.send(message).is_err() {
                                    break;
                                }
                            }
                            _ => break,
                        },
                        command = out_rx.recv() => match command {
                            Some(message) => {
                                if sink.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            if conn_tx.send(WsConn { incoming, outgoing }).is_err() {
                break;
            }
        }
    });

    MockFeedServer {
        host: format!("127.0.0.1:{port}"),
        connections,
    }
}

async fn next_conn(server: &mut MockFeedServer) -> WsConn {
    timeout(WAIT, server.connections.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("server task ended")
}

async fn next_message(conn: &mut WsConn) -> Message {
    timeout(WAIT, conn.incoming.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("connection ended")
}

/// Next binary payload, skipping pings and pongs.
async fn next_binary(conn: &mut WsConn) -> Vec<u8> {
    loop {
        match next_message(conn).await {
            Message::Binary(data) => return data.to_vec(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn manual_config(host: &str) -> Config {
    Config {
        provider: Provider::Manual,
        ip_address: Some(host.to_string()),
        reconnect_schedule: vec![Duration::from_millis(50)],
        ..Config::default()
    }
}

/// Handlers that report every dispatch as `(kind, symbol)` in order.
fn recording_handlers(
    events: mpsc::UnboundedSender<(&'static str, String)>,
) -> (
    intrinio_realtime::TradeHandler,
    intrinio_realtime::QuoteHandler,
) {
    let trade_events = events.clone();
    let on_trade: intrinio_realtime::TradeHandler = Arc::new(move |trade| {
        let _ = trade_events.send(("trade", trade.symbol));
    });
    let on_quote: intrinio_realtime::QuoteHandler = Arc::new(move |quote| {
        let _ = events.send(("quote", quote.symbol));
    });
    (on_trade, on_quote)
}

fn sample_trade(symbol: &str) -> Trade {
    Trade {
        symbol: symbol.to_string(),
        price: 150.99,
        size: 20,
        timestamp: 1_637_092_835_566_268_084,
        total_volume: 2_728_543,
        sub_provider: SubProvider::Iex,
        market_center: 'X',
        condition: String::new(),
    }
}

fn sample_quote(symbol: &str, kind: QuoteKind) -> intrinio_realtime::Quote {
    intrinio_realtime::Quote {
        kind,
        symbol: symbol.to_string(),
        price: 99.5,
        size: 100,
        timestamp: 1_637_092_835_566_268_084,
        sub_provider: SubProvider::Iex,
        market_center: 'X',
        condition: String::new(),
    }
}

async fn wait_for_state(client: &Client, state: SessionState) {
    timeout(WAIT, async {
        loop {
            if client.state() == state {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for session state");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn reconnect_replays_joins_in_registration_order() {
    init_tracing();
    let mut server = start_mock_server().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (on_trade, on_quote) = recording_handlers(events_tx);

    let client = Client::start("key", on_trade, Some(on_quote), manual_config(&server.host))
        .unwrap();

    let mut ws1 = next_conn(&mut server).await;
    client.join(["AAPL"]).await.unwrap();
    client.join(["MSFT"]).await.unwrap();

    assert_eq!(
        next_binary(&mut ws1).await,
        vec![0x4A, 0x00, b'A', b'A', b'P', b'L']
    );
    assert_eq!(
        next_binary(&mut ws1).await,
        vec![0x4A, 0x00, b'M', b'S', b'F', b'T']
    );

    // Kill the connection without a close handshake; the client must
    // self-heal and replay the registry exactly once, in order.
    drop(ws1);

    let mut ws2 = next_conn(&mut server).await;
    assert_eq!(
        next_binary(&mut ws2).await,
        vec![0x4A, 0x00, b'A', b'A', b'P', b'L']
    );
    assert_eq!(
        next_binary(&mut ws2).await,
        vec![0x4A, 0x00, b'M', b'S', b'F', b'T']
    );

    client.stop().await;
}

#[tokio::test]
async fn stop_sends_leave_per_channel_then_close_1000() {
    init_tracing();
    let mut server = start_mock_server().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (on_trade, on_quote) = recording_handlers(events_tx);

    let client = Client::start("key", on_trade, Some(on_quote), manual_config(&server.host))
        .unwrap();

    let mut ws = next_conn(&mut server).await;
    client.join(["AAPL"]).await.unwrap();
    client.join(["MSFT"]).await.unwrap();
    let _ = next_binary(&mut ws).await;
    let _ = next_binary(&mut ws).await;

    client.stop().await;

    assert_eq!(
        next_binary(&mut ws).await,
        vec![0x4C, b'A', b'A', b'P', b'L']
    );
    assert_eq!(
        next_binary(&mut ws).await,
        vec![0x4C, b'M', b'S', b'F', b'T']
    );

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close with code 1000, got {other:?}"),
    }

    // Nothing is sent after the close frame.
    loop {
        match timeout(Duration::from_millis(300), ws.incoming.recv()).await {
            Ok(Some(Message::Binary(data))) => panic!("unexpected frame after close: {data:?}"),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }

    assert_eq!(client.state(), SessionState::Stopped);
}

#[tokio::test]
async fn dispatches_in_frame_order_and_counts_frames() {
    init_tracing();
    let mut server = start_mock_server().await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (on_trade, on_quote) = recording_handlers(events_tx);

    let client = Client::start("key", on_trade, Some(on_quote), manual_config(&server.host))
        .unwrap();

    let mut ws = next_conn(&mut server).await;
    client.join(["AAPL", "MSFT"]).await.unwrap();
    let _ = next_binary(&mut ws).await;
    let _ = next_binary(&mut ws).await;

    let frame = codec::encode_frame(&[
        StreamMessage::Trade(sample_trade("AAPL")),
        StreamMessage::Quote(sample_quote("MSFT", QuoteKind::Ask)),
    ]);
    ws.outgoing.send(Message::Binary(frame.into())).unwrap();

    let first = timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, ("trade", "AAPL".to_string()));
    assert_eq!(second, ("quote", "MSFT".to_string()));

    // One inbound WebSocket message, regardless of sub-message count.
    assert_eq!(client.total_msg_count(), 1);

    client.stop().await;
}

#[tokio::test]
async fn server_close_1000_is_terminal() {
    init_tracing();
    let mut server = start_mock_server().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (on_trade, on_quote) = recording_handlers(events_tx);

    let client = Client::start("key", on_trade, Some(on_quote), manual_config(&server.host))
        .unwrap();

    let ws = next_conn(&mut server).await;
    ws.outgoing
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .unwrap();

    wait_for_state(&client, SessionState::Stopped).await;

    // No reconnect follows a normal close.
    assert!(
        timeout(Duration::from_millis(300), server.connections.recv())
            .await
            .is_err(),
        "client reconnected after a normal close"
    );
}

#[tokio::test]
async fn missing_quote_handler_forces_trades_only_joins() {
    init_tracing();
    let mut server = start_mock_server().await;
    let on_trade: intrinio_realtime::TradeHandler = Arc::new(|_trade| {});

    let client = Client::start("key", on_trade, None, manual_config(&server.host)).unwrap();

    let mut ws = next_conn(&mut server).await;
    client.join(["AAPL"]).await.unwrap();

    // Flag byte is set even though the per-call flag was not.
    assert_eq!(
        next_binary(&mut ws).await,
        vec![0x4A, 0x01, b'A', b'A', b'P', b'L']
    );

    client.stop().await;
}

#[tokio::test]
async fn duplicate_join_sends_one_frame() {
    init_tracing();
    let mut server = start_mock_server().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (on_trade, on_quote) = recording_handlers(events_tx);

    let client = Client::start("key", on_trade, Some(on_quote), manual_config(&server.host))
        .unwrap();

    let mut ws = next_conn(&mut server).await;
    client.join(["AAPL"]).await.unwrap();
    client.join_with(["AAPL"], true).await.unwrap();
    client.join(["MSFT"]).await.unwrap();

    // The duplicate is swallowed; the next frame is MSFT's join.
    assert_eq!(
        next_binary(&mut ws).await,
        vec![0x4A, 0x00, b'A', b'A', b'P', b'L']
    );
    assert_eq!(
        next_binary(&mut ws).await,
        vec![0x4A, 0x00, b'M', b'S', b'F', b'T']
    );

    let channels: Vec<_> = client
        .subscriptions()
        .into_iter()
        .map(|e| (e.channel, e.trades_only))
        .collect();
    assert_eq!(
        channels,
        vec![("AAPL".to_string(), false), ("MSFT".to_string(), false)]
    );

    client.stop().await;
}
