//! Integration tests for [`FeedSession`] against an in-process WebSocket server.
//!
//! Each test binds a server on `127.0.0.1:0`, points a session at it over
//! plain `ws://` and drives the server side by hand: reading control frames,
//! pushing binary ticks, dropping connections.
//!
//! # What is tested
//!
//! - **Handshake** — auth headers and the on-connect callback
//! - **Subscriptions** — control frame shape, quota rejection without a send
//! - **Inbound frames** — ticks, malformed packets, raw frames, text frames
//! - **Heartbeat** — `"ping"` probes and `"pong"` bookkeeping
//! - **Reconnect** — resubscription, retry exhaustion, server close frames,
//!   caller close (also mid-delay), dropping the last handle
//! - **Dispatch** — a slow consumer does not stall reads; ordered delivery

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use smartstream_rs::credentials::Credentials;
use smartstream_rs::types::enums::{ExchangeType, SubscriptionMode};
use smartstream_rs::ws::config::{FeedSessionBuilder, RetryPolicy};
use smartstream_rs::ws::events::FeedMessage;
use smartstream_rs::ws::session::ConnectionState;
use smartstream_rs::ws::subscription::TokenSet;
use smartstream_rs::{FeedSession, StreamError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

type ServerWs = WebSocketStream<TcpStream>;

/// Accepts WebSocket connections and hands them to the test.
struct MockServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerWs>,
    accepted: Arc<AtomicUsize>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl MockServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let headers = Arc::new(Mutex::new(Vec::new()));

        let accepted_task = accepted.clone();
        let headers_task = headers.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                accepted_task.fetch_add(1, Ordering::SeqCst);
                let headers = headers_task.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    headers.lock().unwrap().push(req.headers().clone());
                    Ok(resp)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            conns,
            accepted,
            headers,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn next_conn(&mut self) -> ServerWs {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Read the next text frame, skipping heartbeat probes.
async fn next_control_frame(ws: &mut ServerWs) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("read error");
        if let Message::Text(text) = msg {
            if text.as_str() != "ping" {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }
}

/// Everything the session reported through its callbacks.
#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    closes: AtomicUsize,
    no_reconnects: AtomicUsize,
    reconnects: Mutex<Vec<u32>>,
    messages: Mutex<Vec<FeedMessage>>,
    errors: Mutex<Vec<StreamError>>,
}

impl Recorder {
    fn attach(session: &FeedSession) -> Arc<Self> {
        let rec = Arc::new(Self::default());
        let handlers = session.handlers();

        let r = rec.clone();
        handlers.on_connect(move || {
            r.connects.fetch_add(1, Ordering::SeqCst);
        });
        let r = rec.clone();
        handlers.on_close(move || {
            r.closes.fetch_add(1, Ordering::SeqCst);
        });
        let r = rec.clone();
        handlers.on_no_reconnect(move || {
            r.no_reconnects.fetch_add(1, Ordering::SeqCst);
        });
        let r = rec.clone();
        handlers.on_reconnect(move |n| r.reconnects.lock().unwrap().push(n));
        let r = rec.clone();
        handlers.on_message(move |msg| r.messages.lock().unwrap().push(msg));
        let r = rec.clone();
        handlers.on_error(move |e| r.errors.lock().unwrap().push(e));

        rec
    }

    fn ticks(&self) -> Vec<(String, i64, f64)> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                FeedMessage::Tick(t) => Some((
                    t.header().token.clone(),
                    t.header().sequence_number,
                    t.header().last_traded_price,
                )),
                _ => None,
            })
            .collect()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn credentials() -> Credentials {
    Credentials::new("Bearer jwt-abc", "api-key-1", "A123456", "feed-xyz").unwrap()
}

fn session_for(
    server: &MockServer,
    configure: impl FnOnce(FeedSessionBuilder) -> FeedSessionBuilder,
) -> FeedSession {
    let builder = FeedSession::builder(credentials())
        .endpoint(server.url())
        .connect_timeout(Duration::from_secs(2))
        .write_timeout(Duration::from_secs(2))
        .shutdown_timeout(Duration::from_secs(1));
    configure(builder).build().unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        delay: Duration::from_millis(30),
        duration_ceiling: Duration::from_millis(100),
        ..RetryPolicy::default()
    }
}

/// A 51-byte LTP packet.
fn ltp_packet(token: &str, sequence: i64, ltp_paise: i64) -> Vec<u8> {
    let mut buf = vec![0u8; 51];
    buf[0] = 1;
    buf[1] = 1;
    buf[2..2 + token.len()].copy_from_slice(token.as_bytes());
    buf[27..35].copy_from_slice(&sequence.to_le_bytes());
    buf[35..43].copy_from_slice(&1_700_000_000_000i64.to_le_bytes());
    buf[43..51].copy_from_slice(&ltp_paise.to_le_bytes());
    buf
}

fn ltp_nse(tokens: &[&str]) -> Vec<TokenSet> {
    vec![TokenSet::new(ExchangeType::NSE_CM, tokens.iter().copied())]
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_auth_headers_and_fires_on_connect() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b);
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let _ws = server.next_conn().await;

    assert!(session.is_connected());
    assert!(wait_until(|| rec.connects.load(Ordering::SeqCst) == 1).await);

    let headers = server.headers.lock().unwrap()[0].clone();
    assert_eq!(headers.get("authorization").unwrap(), "Bearer jwt-abc");
    assert_eq!(headers.get("x-api-key").unwrap(), "api-key-1");
    assert_eq!(headers.get("x-client-code").unwrap(), "A123456");
    assert_eq!(headers.get("x-feed-token").unwrap(), "feed-xyz");

    session.close().await.unwrap();
}

#[tokio::test]
async fn second_connect_while_connected_is_rejected() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b);

    session.connect().await.unwrap();
    let _ws = server.next_conn().await;

    assert!(matches!(
        session.connect().await,
        Err(StreamError::InvalidArgument(_))
    ));
    session.close().await.unwrap();
}

#[tokio::test]
async fn connect_failure_is_returned_and_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = FeedSession::builder(credentials())
        .endpoint(format!("ws://{addr}"))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let rec = Recorder::attach(&session);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::ConnectionFailure(_) | StreamError::ConnectTimeout(_)
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(wait_until(|| rec.errors.lock().unwrap().len() == 1).await);
    assert_eq!(rec.connects.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_and_unsubscribe_send_control_frames() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b);

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    session
        .subscribe("sub-1", SubscriptionMode::Ltp, ltp_nse(&["5900", "2885"]))
        .await
        .unwrap();
    let frame = next_control_frame(&mut ws).await;
    assert_eq!(frame["correlationID"], "sub-1");
    assert_eq!(frame["action"], 1);
    assert_eq!(frame["params"]["mode"], 1);
    assert_eq!(frame["params"]["tokenList"][0]["exchangeType"], 1);
    assert_eq!(
        frame["params"]["tokenList"][0]["tokens"],
        serde_json::json!(["5900", "2885"])
    );

    session
        .unsubscribe("unsub-1", SubscriptionMode::Ltp, ltp_nse(&["5900"]))
        .await
        .unwrap();
    let frame = next_control_frame(&mut ws).await;
    assert_eq!(frame["action"], 0);
    assert_eq!(frame["correlationID"], "unsub-1");

    let registry = session.subscriptions();
    assert!(registry.tokens(SubscriptionMode::Ltp).unwrap().is_empty());
    assert!(registry.is_empty());

    session.close().await.unwrap();
}

#[tokio::test]
async fn quota_breach_is_rejected_before_sending() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.quota(2));

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    let err = session
        .subscribe("too-many", SubscriptionMode::Quote, ltp_nse(&["1", "2", "3"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::QuotaExceeded {
            limit: 2,
            subscribed: 0,
            requested: 3
        }
    ));
    assert!(session.subscriptions().is_empty());

    let nothing = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(nothing.is_err(), "no frame should have been sent");

    session.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frame_is_reported_and_stream_continues() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b);
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    ws.send(Message::binary(vec![1u8; 10])).await.unwrap();
    ws.send(Message::binary(ltp_packet("5900", 1, 1_950_000)))
        .await
        .unwrap();

    assert!(wait_until(|| rec.ticks().len() == 1).await);
    assert_eq!(rec.ticks()[0], ("5900".to_owned(), 1, 19_500.0));

    let errors = rec.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], StreamError::MalformedPacket(_)));
    drop(errors);

    assert!(session.is_connected());
    session.close().await.unwrap();
}

#[tokio::test]
async fn raw_and_text_frames_are_delivered() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.deliver_raw_frames(true));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    let packet = ltp_packet("2885", 9, 250_000);
    ws.send(Message::binary(packet.clone())).await.unwrap();
    ws.send(Message::text(r#"{"errorCode":"E1002"}"#)).await.unwrap();

    assert!(wait_until(|| rec.messages.lock().unwrap().len() == 3).await);
    let messages = rec.messages.lock().unwrap();
    assert!(matches!(&messages[0], FeedMessage::Raw(bytes) if bytes.as_ref() == packet.as_slice()));
    assert!(matches!(&messages[1], FeedMessage::Tick(t) if t.header().token == "2885"));
    assert!(matches!(&messages[2], FeedMessage::Text(t) if t.contains("E1002")));
    drop(messages);

    session.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_probes_and_records_pong() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.heartbeat_interval(Duration::from_millis(50)));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg, Message::text("ping"));
    ws.send(Message::text("pong")).await.unwrap();

    assert!(wait_until(|| session.last_pong().is_some()).await);
    assert!(session.last_ping().is_some());
    // The reply is bookkeeping, not a message.
    assert!(rec.messages.lock().unwrap().is_empty());

    session.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.retry(fast_retry(5)));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut first = server.next_conn().await;

    session
        .subscribe(
            "snap",
            SubscriptionMode::SnapQuote,
            vec![TokenSet::new(ExchangeType::NSE_FO, ["35003"])],
        )
        .await
        .unwrap();
    let _ = next_control_frame(&mut first).await;

    // Kill the connection mid-subscription.
    drop(first);

    let mut second = server.next_conn().await;
    let frame = next_control_frame(&mut second).await;
    assert_eq!(frame["correlationID"], "resubscribe");
    assert_eq!(frame["action"], 1);
    assert_eq!(frame["params"]["mode"], 3);
    assert_eq!(frame["params"]["tokenList"][0]["exchangeType"], 2);
    assert_eq!(frame["params"]["tokenList"][0]["tokens"], serde_json::json!(["35003"]));

    assert!(wait_until(|| *rec.reconnects.lock().unwrap() == vec![1]).await);
    assert!(wait_until(|| rec.connects.load(Ordering::SeqCst) == 2).await);
    assert!(session.is_connected());

    // The first inbound frame on the new connection resets the counter.
    second
        .send(Message::binary(ltp_packet("35003", 1, 100)))
        .await
        .unwrap();
    assert!(wait_until(|| session.retry_attempt() == 0).await);

    session.close().await.unwrap();
}

#[tokio::test]
async fn reconnect_without_resubscribe_keeps_registry_silent() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| {
        b.retry(fast_retry(5)).resubscribe_on_reconnect(false)
    });
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut first = server.next_conn().await;
    session
        .subscribe("ltp", SubscriptionMode::Ltp, ltp_nse(&["5900"]))
        .await
        .unwrap();
    let _ = next_control_frame(&mut first).await;
    drop(first);

    let mut second = server.next_conn().await;
    assert!(wait_until(|| rec.reconnects.lock().unwrap().len() == 1).await);
    let nothing = tokio::time::timeout(Duration::from_millis(200), second.next()).await;
    assert!(nothing.is_err(), "registry must not be replayed");

    // Still retained, and replayable on demand.
    assert_eq!(session.subscriptions().total_tokens(), 1);
    assert_eq!(session.resubscribe().await.unwrap(), 1);
    let frame = next_control_frame(&mut second).await;
    assert_eq!(frame["params"]["tokenList"][0]["tokens"], serde_json::json!(["5900"]));

    session.close().await.unwrap();
}

#[tokio::test]
async fn retries_exhaust_once_and_stop() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.retry(fast_retry(2)));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();

    // Drop every connection right after the handshake.
    let dropper = tokio::spawn(async move {
        while let Some(ws) = server.conns.recv().await {
            drop(ws);
        }
    });

    assert!(wait_until(|| rec.no_reconnects.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(rec.no_reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.retry_attempt(), 2);
    // Initial connection plus two attempts.
    assert_eq!(rec.connects.load(Ordering::SeqCst), 3);
    assert_eq!(*rec.reconnects.lock().unwrap(), vec![1, 2]);

    dropper.abort();
}

#[tokio::test]
async fn close_suppresses_reconnect() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.retry(fast_retry(5)));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    session.close().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // The server observes the close handshake or the socket going away.
    let end = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1);
    assert!(wait_until(|| rec.closes.load(Ordering::SeqCst) == 1).await);
    assert!(rec.reconnects.lock().unwrap().is_empty());
    assert_eq!(rec.no_reconnects.load(Ordering::SeqCst), 0);

    assert!(matches!(
        session
            .subscribe("late", SubscriptionMode::Ltp, ltp_nse(&["1"]))
            .await,
        Err(StreamError::NotConnected)
    ));
}

#[tokio::test]
async fn close_during_retry_delay_stops_reconnecting() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| {
        b.retry(RetryPolicy {
            delay: Duration::from_secs(1),
            duration_ceiling: Duration::from_secs(1),
            ..fast_retry(5)
        })
    });
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    drop(server.next_conn().await);

    // The read failure is reported before the retry delay starts.
    assert!(wait_until(|| !rec.errors.lock().unwrap().is_empty()).await);
    assert!(wait_until(|| session.retry_attempt() == 1).await);

    let started = tokio::time::Instant::now();
    session.close().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(900));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(rec.reconnects.lock().unwrap().is_empty());
    assert_eq!(rec.no_reconnects.load(Ordering::SeqCst), 0);
    assert!(wait_until(|| rec.closes.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn server_close_frame_triggers_reconnect() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b.retry(fast_retry(5)));
    let rec = Recorder::attach(&session);

    session.connect().await.unwrap();
    let mut first = server.next_conn().await;
    first.close(None).await.unwrap();

    let _second = server.next_conn().await;
    assert!(wait_until(|| *rec.reconnects.lock().unwrap() == vec![1]).await);
    assert!(session.is_connected());
    assert!(
        rec.errors
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StreamError::ReadFailure(_)))
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn dropping_every_handle_tears_down_the_connection() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| {
        b.heartbeat_interval(Duration::from_millis(50))
            .retry(fast_retry(5))
    });
    let rec = Recorder::attach(&session);
    let clone = session.clone();

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    // One clone going away leaves the connection alone.
    drop(clone);
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg, Message::text("ping"));

    drop(session);
    let end = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "socket stayed open after the last handle was dropped");

    // No reconnect follows the teardown.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 1);
    assert!(rec.reconnects.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_consumer_does_not_stall_reads() {
    let mut server = MockServer::start().await;
    let session = session_for(&server, |b| b);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.handlers().on_message(move |msg| {
        std::thread::sleep(Duration::from_millis(150));
        if let FeedMessage::Tick(t) = msg {
            sink.lock().unwrap().push(t.header().sequence_number);
        }
    });

    session.connect().await.unwrap();
    let mut ws = server.next_conn().await;

    for seq in 1..=5 {
        ws.send(Message::binary(ltp_packet("5900", seq, 100)))
            .await
            .unwrap();
    }
    ws.send(Message::text("pong")).await.unwrap();

    // The read loop gets to the trailing pong long before the handler
    // finishes five slow ticks.
    assert!(wait_until(|| session.last_pong().is_some()).await);
    assert!(seen.lock().unwrap().len() < 5);

    // Ordered dispatch still delivers in arrival order.
    assert!(wait_until(|| seen.lock().unwrap().len() == 5).await);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);

    session.close().await.unwrap();
}
