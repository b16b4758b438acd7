//! Socket-level tests: hub connections and the connector over real TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether_realtime::{
    accept_connection, Connection, Connector, ConnectorConfig, ConnectorEvent, ConnectorState,
    Hub, HubConfig, LifecycleEvent, MessageHandler, Payload,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct Events {
    closes: AtomicUsize,
    errors: AtomicUsize,
}

struct TestServer {
    hub: Hub,
    addr: SocketAddr,
    events: Arc<Events>,
}

impl TestServer {
    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

async fn start_server(config: HubConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = Hub::start(config);
    let events = Arc::new(Events::default());
    let handler: Arc<dyn MessageHandler> = Arc::new(|_: &Connection, p: Payload| Some(p));

    let accept_hub = hub.clone();
    let accept_events = events.clone();
    tokio::spawn(async move {
        while let Ok((socket, peer)) = listener.accept().await {
            let Ok(pending) = accept_connection(socket, Some(peer), accept_hub.config()).await
            else {
                continue;
            };

            let events = accept_events.clone();
            pending.on(LifecycleEvent::Close, move |_, _| {
                events.closes.fetch_add(1, Ordering::SeqCst);
            });
            let events = accept_events.clone();
            pending.on(LifecycleEvent::Error, move |_, _| {
                events.errors.fetch_add(1, Ordering::SeqCst);
            });

            accept_hub.attach(pending, handler.clone());
        }
    });

    TestServer { hub, addr, events }
}

async fn eventually(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A port nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_hub_echo_over_socket() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    eventually("registration", Duration::from_secs(2), || server.hub.count() == 1).await;

    ws.send(Message::Text(r#"{"cmd":"echo","n":7}"#.to_string()))
        .await
        .unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break Payload::from_bytes(text.as_bytes()),
            _ => continue,
        }
    };
    assert_eq!(reply.get_str("cmd"), "echo");
    assert_eq!(reply.get_i64("n"), 7);

    // Malformed frames decode to an empty payload and produce no reply.
    ws.send(Message::Text("not json".to_string())).await.unwrap();
    ws.send(Message::Text(r#"{"after":true}"#.to_string()))
        .await
        .unwrap();
    let reply = loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => break Payload::from_bytes(text.as_bytes()),
            _ => continue,
        }
    };
    assert!(reply.get_bool("after"));

    ws.close(None).await.unwrap();
    eventually("unregister", Duration::from_secs(2), || server.hub.count() == 0).await;
    assert_eq!(server.events.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_idle_timeout_closes_without_error() {
    let config = HubConfig {
        ping_interval: Duration::from_millis(50),
        pong_wait: Duration::from_millis(200),
        ..Default::default()
    };
    let server = start_server(config).await;

    // Never polled after the handshake, so no pongs and no frames reach the server.
    let (_ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    eventually("registration", Duration::from_secs(2), || {
        server.hub.stats().total_connections == 1
    })
    .await;
    eventually("idle close", Duration::from_secs(3), || {
        server.events.closes.load(Ordering::SeqCst) == 1
    })
    .await;

    server.hub.flush().await;
    assert_eq!(server.hub.count(), 0);
    assert_eq!(server.events.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unexpected_close_code_reports_error() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    ws.close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: "policy".into(),
    }))
    .await
    .unwrap();

    eventually("close", Duration::from_secs(2), || {
        server.events.closes.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(server.events.errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_vanishing_without_close_frame_is_not_an_error() {
    let server = start_server(HubConfig::default()).await;
    let (ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    eventually("registration", Duration::from_secs(2), || server.hub.count() == 1).await;

    // Drop the socket without a closing handshake, like a killed browser tab.
    drop(ws);

    eventually("close", Duration::from_secs(2), || {
        server.events.closes.load(Ordering::SeqCst) == 1
    })
    .await;
    eventually("unregister", Duration::from_secs(2), || server.hub.count() == 0).await;
    assert_eq!(server.events.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hub_close_flushes_queue_then_closes() {
    let server = start_server(HubConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
    eventually("registration", Duration::from_secs(2), || server.hub.count() == 1).await;

    let id = server.hub.connection_ids().remove(0);
    server.hub.send_to(&id, Payload::new().with("type", "goodbye"));
    server.hub.close(&id);

    let mut texts = Vec::new();
    let mut close_code = None;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => texts.push(text),
            Message::Close(frame) => {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
            _ => {}
        }
    }

    assert_eq!(texts, vec![r#"{"type":"goodbye"}"#.to_string()]);
    assert_eq!(close_code, Some(1000));
}

#[tokio::test]
async fn test_connector_unreachable_stays_dialing() {
    let addr = closed_port().await;
    let interval = Duration::from_millis(20);
    let connector = Connector::new(
        ConnectorConfig::new(format!("ws://{}/ws", addr)).with_reconnect_interval(interval),
    );

    let reconnecting = Arc::new(AtomicUsize::new(0));
    let counter = reconnecting.clone();
    connector.on(ConnectorEvent::Reconnecting, move |ctx| {
        assert!(ctx.error.is_some());
        counter.fetch_add(1, Ordering::SeqCst);
        None
    });
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    connector.on(ConnectorEvent::Close, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        None
    });

    let handle = connector.start();
    tokio::time::sleep(interval * 12).await;

    assert_eq!(connector.state(), ConnectorState::Dialing);
    assert!(connector.dial_attempts() >= 3);
    assert_eq!(reconnecting.load(Ordering::SeqCst), 1);

    connector.stop();
    handle.await.unwrap().unwrap();
    assert_eq!(connector.state(), ConnectorState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connector_reconnects_after_server_drop() {
    let server = start_server(HubConfig::default()).await;
    let interval = Duration::from_millis(50);
    let connector =
        Connector::new(ConnectorConfig::new(server.url()).with_reconnect_interval(interval));

    let (opened_tx, mut opened) = mpsc::unbounded_channel();
    connector.on(ConnectorEvent::Open, move |_| {
        let _ = opened_tx.send(());
        None
    });

    let handle = connector.start();
    tokio::time::timeout(Duration::from_secs(2), opened.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(connector.is_connected());

    eventually("registration", Duration::from_secs(2), || server.hub.count() == 1).await;
    for id in server.hub.connection_ids() {
        server.hub.close(&id);
    }

    tokio::time::timeout(interval * 5, opened.recv())
        .await
        .expect("second open within five reconnect intervals")
        .unwrap();
    eventually("second registration", Duration::from_secs(2), || {
        server.hub.stats().total_connections == 2
    })
    .await;

    connector.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connector_delivers_frames_queued_before_connect() {
    let server = start_server(HubConfig::default()).await;
    let connector = Connector::new(
        ConnectorConfig::new(server.url()).with_reconnect_interval(Duration::from_millis(50)),
    );

    connector
        .send(Payload::new().with("cmd", "echo").with("message", "early"))
        .unwrap();

    let (messages_tx, mut messages) = mpsc::unbounded_channel();
    connector.on(ConnectorEvent::Message, move |ctx| {
        let _ = messages_tx.send(ctx.data.clone());
        None
    });

    let handle = connector.start();
    let echoed = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed.get_str("message"), "early");

    connector.stop();
    handle.await.unwrap().unwrap();
    assert!(matches!(
        connector.send("late"),
        Err(tether_realtime::RealtimeError::Stopped)
    ));
}

#[tokio::test]
async fn test_connector_reconnecting_fires_once_per_losing_streak() {
    let addr = closed_port().await;
    let interval = Duration::from_millis(20);
    let connector = Connector::new(
        ConnectorConfig::new(format!("ws://{}/ws", addr)).with_reconnect_interval(interval),
    );

    let reconnecting = Arc::new(AtomicUsize::new(0));
    let counter = reconnecting.clone();
    connector.on(ConnectorEvent::Reconnecting, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        None
    });
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    connector.on(ConnectorEvent::Error, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        None
    });
    let (opened_tx, mut opened) = mpsc::unbounded_channel();
    connector.on(ConnectorEvent::Open, move |_| {
        let _ = opened_tx.send(());
        None
    });

    // First streak: nothing listens yet.
    let handle = connector.start();
    eventually("first failed dials", Duration::from_secs(2), || {
        connector.dial_attempts() >= 3
    })
    .await;
    assert_eq!(reconnecting.load(Ordering::SeqCst), 1);

    // Serve exactly one connection, then stop listening.
    let listener = TcpListener::bind(addr).await.unwrap();
    let hub = Hub::start(HubConfig::default());
    let accept_hub = hub.clone();
    let handler: Arc<dyn MessageHandler> = Arc::new(|_: &Connection, _: Payload| None);
    tokio::spawn(async move {
        let (socket, peer) = listener.accept().await.unwrap();
        let pending = accept_connection(socket, Some(peer), accept_hub.config())
            .await
            .unwrap();
        accept_hub.attach(pending, handler);
    });

    tokio::time::timeout(Duration::from_secs(2), opened.recv())
        .await
        .expect("connected once the server is up")
        .unwrap();
    assert_eq!(connector.dial_attempts(), 0);
    eventually("registration", Duration::from_secs(2), || hub.count() == 1).await;

    // Second streak: the server goes away for good.
    hub.shutdown().await;
    eventually("second streak", Duration::from_secs(2), || {
        connector.dial_attempts() >= 5
    })
    .await;

    assert_eq!(connector.state(), ConnectorState::Dialing);
    assert_eq!(reconnecting.load(Ordering::SeqCst), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    connector.stop();
    handle.await.unwrap().unwrap();
}
