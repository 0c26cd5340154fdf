//! Integration tests for sockwire.
//!
//! Every test runs a real server and client over loopback TCP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use sockwire::codec::MsgPackCodec;
use sockwire::protocol::{
    Decoder, DelimiterProtocol, LengthPrefixProtocol, PlainProtocol, Protocol,
};
use sockwire::{
    ClientBuilder, Connection, ConnectionState, Message, Server, ServerBuilder, SockwireError,
    UnhandledAction,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Server answering action 7 and "echo"; everything else is dropped.
async fn ping_server() -> Server {
    ServerBuilder::new()
        .action(7, |msg: Message, ctx| async move {
            if msg.as_str()? == "ping" {
                ctx.reply("pong").await
            } else {
                ctx.reply("what?").await
            }
        })
        .action("echo", |msg: Message, ctx| async move {
            ctx.reply(msg.into_payload()).await
        })
        .bind("127.0.0.1:0")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_action_ping_pong() {
    init_tracing();
    let server = ping_server().await;
    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();

    let reply = conn
        .send_action_and_get_reply(7, "ping", Some(WAIT))
        .await
        .unwrap()
        .expect("reply");

    assert_eq!(reply.as_str().unwrap(), "pong");
    assert_eq!(reply.action(), None);

    conn.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_timeout_returns_no_reply_and_connection_stays_usable() {
    init_tracing();
    let server = ping_server().await;
    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();

    let start = Instant::now();
    let reply = conn
        .send_action_and_get_reply(99, "anyone?", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    assert!(conn.is_connected());

    let reply = conn
        .send_action_and_get_reply(7, "ping", Some(WAIT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_str().unwrap(), "pong");

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_request_is_busy() {
    init_tracing();
    let server = ping_server().await;
    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();

    let first = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.send_action_and_get_reply(99, "unanswered", Some(Duration::from_millis(500)))
                .await
        })
    };
    eventually("first request to wait", || conn.is_awaiting_reply()).await;

    let second = conn.send_action_and_get_reply(7, "ping", Some(WAIT)).await;
    assert!(matches!(second, Err(SockwireError::Busy)));

    // The first request is untouched by the rejected one.
    assert!(first.await.unwrap().unwrap().is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_resolves_pending_request() {
    init_tracing();
    let server = ping_server().await;
    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();

    let waiting = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send_action_and_get_reply(99, "wait", None).await })
    };
    eventually("request to wait", || conn.is_awaiting_reply()).await;

    conn.close().await;

    let outcome = tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SockwireError::ConnectionClosed)));
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_disconnect_resolves_pending_request() {
    init_tracing();
    let server = ping_server().await;
    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();
    eventually("registration", || server.connection_count() == 1).await;

    let waiting = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.send_action_and_get_reply(99, "wait", None).await })
    };
    eventually("request to wait", || conn.is_awaiting_reply()).await;

    server.shutdown().await;

    let outcome = tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SockwireError::ConnectionClosed)));
    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
}

#[tokio::test]
async fn test_router_sees_wire_order() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = {
        let seen = seen.clone();
        ServerBuilder::new()
            .action("seq", move |msg: Message, _ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(msg.to::<u32>()?);
                    Ok(())
                }
            })
            .bind("127.0.0.1:0")
            .await
            .unwrap()
    };

    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();
    for i in 0..500u32 {
        conn.send_action("seq", i).await.unwrap();
    }

    eventually("all messages", || seen.lock().unwrap().len() == 500).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..500).collect::<Vec<_>>());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_connections_match_replies() {
    init_tracing();
    let server = ping_server().await;
    let addr = server.local_addr();

    let mut tasks = Vec::new();
    for c in 0..10 {
        tasks.push(tokio::spawn(async move {
            let conn = ClientBuilder::new().connect(addr).await.unwrap();
            for i in 0..1000 {
                let nonce = format!("{}:{}", c, i);
                let reply = conn
                    .send_action_and_get_reply("echo", nonce.as_str(), Some(WAIT))
                    .await
                    .unwrap()
                    .expect("reply");
                assert_eq!(reply.as_str().unwrap(), nonce);
            }
            conn.close().await;
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    server.shutdown().await;
}

async fn echo_round_trip<P: Protocol + Clone>(protocol: P, payloads: &[&[u8]]) {
    let server = ServerBuilder::new()
        .protocol(protocol.clone())
        .on_data(|conn: Connection, msg: Message| async move {
            let _ = conn.send(msg.into_payload()).await;
        })
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let conn = ClientBuilder::new()
        .protocol(protocol)
        .connect(server.local_addr())
        .await
        .unwrap();

    for payload in payloads {
        let reply = conn
            .send_and_get_reply(*payload, Some(WAIT))
            .await
            .unwrap()
            .expect("reply");
        assert_eq!(reply.payload(), *payload);
    }

    conn.close().await;
    server.shutdown().await;
}

#[derive(Clone)]
struct Framed<P>(P);

impl<P: Protocol> Protocol for Framed<P> {
    fn frame(&self, parts: &[&[u8]]) -> sockwire::Result<Bytes> {
        self.0.frame(parts)
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        self.0.decoder()
    }
}

#[tokio::test]
async fn test_round_trip_length_prefix() {
    init_tracing();
    let big = vec![0xAB; 60_000];
    echo_round_trip(
        Framed(LengthPrefixProtocol::new()),
        &[&b"hello"[..], &b""[..], &big[..], &b"\r\n\0"[..]],
    )
    .await;
}

#[tokio::test]
async fn test_round_trip_large_length_prefix() {
    init_tracing();
    let big = vec![7u8; 300_000];
    echo_round_trip(Framed(LengthPrefixProtocol::large()), &[&b"small"[..], &big[..]]).await;
}

#[tokio::test]
async fn test_round_trip_delimiter() {
    init_tracing();
    let protocol = DelimiterProtocol::new(Bytes::from_static(b"\n")).unwrap();
    echo_round_trip(
        Framed(protocol),
        &[&b"line one"[..], &b"line two"[..], &b"\r\t"[..]],
    )
    .await;
}

#[tokio::test]
async fn test_round_trip_plain() {
    init_tracing();
    echo_round_trip(Framed(PlainProtocol::new()), &[&b"one"[..], &b"two"[..]]).await;
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Login {
    user: String,
    attempt: u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Welcome {
    greeting: String,
    session: u64,
}

#[tokio::test]
async fn test_typed_action_with_object_reply() {
    init_tracing();
    let server = ServerBuilder::new()
        .action_typed("login", |login: Login, ctx| async move {
            ctx.reply_object(&Welcome {
                greeting: format!("hi {}", login.user),
                session: u64::from(login.attempt) * 10,
            })
            .await
        })
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();
    let request = MsgPackCodec::encode(&Login {
        user: "ada".to_string(),
        attempt: 3,
    })
    .unwrap();

    let reply = conn
        .send_action_and_get_reply("login", request, Some(WAIT))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        reply.to_object::<Welcome>().unwrap(),
        Welcome {
            greeting: "hi ada".to_string(),
            session: 30,
        }
    );
    server.shutdown().await;
}

#[tokio::test]
async fn test_unhandled_action_reports_error() {
    init_tracing();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let server = {
        let errors = errors.clone();
        ServerBuilder::new()
            .action(1, |_msg: Message, _ctx| async { Ok(()) })
            .unhandled_actions(UnhandledAction::Error)
            .on_error(move |_conn, e| errors.lock().unwrap().push(e.to_string()))
            .bind("127.0.0.1:0")
            .await
            .unwrap()
    };

    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();
    conn.send_action(42, "lost").await.unwrap();

    eventually("error report", || !errors.lock().unwrap().is_empty()).await;
    assert!(errors.lock().unwrap()[0].contains("42"));

    // The connection survives an unknown action.
    conn.send_action(1, "fine").await.unwrap();
    assert!(conn.is_connected());
    server.shutdown().await;
}

#[tokio::test]
async fn test_unhandled_action_notify_reaches_data_handler() {
    init_tracing();
    let (tx, mut rx) = mpsc::channel(4);
    let server = ServerBuilder::new()
        .action(1, |_msg: Message, _ctx| async { Ok(()) })
        .unhandled_actions(UnhandledAction::Notify)
        .on_data(move |_conn, msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg).await;
            }
        })
        .bind("127.0.0.1:0")
        .await
        .unwrap();

    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();
    conn.send_action(5, "fallthrough").await.unwrap();

    let msg = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.action(), Some(5));
    assert_eq!(msg.as_str().unwrap(), "fallthrough");
    server.shutdown().await;
}

#[derive(Clone)]
struct Gatekeeper {
    admit_server_side: bool,
    admit_client_side: bool,
}

impl Protocol for Gatekeeper {
    fn frame(&self, parts: &[&[u8]]) -> sockwire::Result<Bytes> {
        LengthPrefixProtocol::new().frame(parts)
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        LengthPrefixProtocol::new().decoder()
    }

    fn on_connect(&self, conn: &Connection) -> bool {
        if self.admit_server_side {
            conn.ensure_receiving();
        }
        self.admit_server_side
    }

    fn on_connect_as_client(&self, conn: &Connection) -> bool {
        if self.admit_client_side {
            conn.ensure_receiving();
        }
        self.admit_client_side
    }
}

#[tokio::test]
async fn test_server_side_hook_rejects_connection() {
    init_tracing();
    let connects = Arc::new(AtomicUsize::new(0));
    let server = {
        let connects = connects.clone();
        ServerBuilder::new()
            .protocol(Gatekeeper {
                admit_server_side: false,
                admit_client_side: true,
            })
            .on_connect(move |_conn| {
                connects.fetch_add(1, Ordering::SeqCst);
            })
            .bind("127.0.0.1:0")
            .await
            .unwrap()
    };

    let conn = ClientBuilder::new().connect(server.local_addr()).await.unwrap();

    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_client_side_hook_rejects_connection() {
    init_tracing();
    let server = ServerBuilder::new().bind("127.0.0.1:0").await.unwrap();

    let result = ClientBuilder::new()
        .protocol(Gatekeeper {
            admit_server_side: true,
            admit_client_side: false,
        })
        .connect(server.local_addr())
        .await;

    assert!(matches!(result, Err(SockwireError::Rejected)));
    server.shutdown().await;
}

#[tokio::test]
async fn test_registry_and_broadcast() {
    init_tracing();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let server = {
        let disconnects = disconnects.clone();
        ServerBuilder::new()
            .on_disconnect(move |_conn| {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
            .bind("127.0.0.1:0")
            .await
            .unwrap()
    };

    let (tx, mut rx) = mpsc::channel(16);
    let client = ClientBuilder::new()
        .on_data(move |conn: Connection, msg: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((conn.id(), msg)).await;
            }
        })
        .build();

    let mut conns = Vec::new();
    for _ in 0..3 {
        conns.push(client.connect(server.local_addr()).await.unwrap());
    }
    eventually("three registrations", || server.connection_count() == 3).await;

    assert_eq!(server.broadcast("hello all").await, 3);

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (id, msg) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg.as_str().unwrap(), "hello all");
        receivers.push(id);
    }
    receivers.sort();
    receivers.dedup();
    assert_eq!(receivers.len(), 3);

    conns.pop().unwrap().close().await;
    eventually("registry removal", || server.connection_count() == 2).await;
    eventually("disconnect event", || disconnects.load(Ordering::SeqCst) == 1).await;

    server.shutdown().await;
    assert_eq!(server.connection_count(), 0);
    for conn in &conns {
        tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    }
}

#[tokio::test]
async fn test_connect_and_disconnect_events_fire_once() {
    init_tracing();
    let events = Arc::new(Mutex::new(Vec::new()));
    let conn = {
        let server = ServerBuilder::new().bind("127.0.0.1:0").await.unwrap();
        let on_connect = events.clone();
        let on_disconnect = events.clone();
        let conn = ClientBuilder::new()
            .on_connect(move |_conn| on_connect.lock().unwrap().push("connect"))
            .on_disconnect(move |_conn| on_disconnect.lock().unwrap().push("disconnect"))
            .connect(server.local_addr())
            .await
            .unwrap();
        server.shutdown().await;
        conn
    };

    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    conn.close().await;

    assert_eq!(*events.lock().unwrap(), vec!["connect", "disconnect"]);
}
