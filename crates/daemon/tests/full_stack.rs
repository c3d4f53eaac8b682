use std::time::Duration;

use eeg_sensor::{DeviceConfig, MockDriver};
use engagement_daemon::{
    server::{self, AppState},
    AcquisitionLoop, BridgeConfig, BridgeResult, LoopState,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    client_async, connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A running bridge on an ephemeral port, backed by the mock board.
struct TestBridge {
    addr: String,
    shutdown: CancellationToken,
    state: watch::Receiver<LoopState>,
    acquisition: JoinHandle<BridgeResult<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl TestBridge {
    async fn start() -> Self {
        Self::start_with(BridgeConfig {
            ws_addr: "ws://127.0.0.1:0".to_string(),
            pull_interval_ms: 20,
            output_interval_ms: 100,
            window_secs: 0.5,
            subscriber_queue_capacity: 64,
            device: DeviceConfig {
                sample_rate: 250,
                channel_count: 4,
                ..DeviceConfig::default()
            },
            ..BridgeConfig::default()
        })
        .await
    }

    async fn start_with(config: BridgeConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (acquisition, handle) = AcquisitionLoop::new(config.clone(), MockDriver::new());
        let state = AppState::new(&handle, &config);
        let shutdown = CancellationToken::new();

        Self {
            addr,
            state: handle.state.clone(),
            server: tokio::spawn(server::run(listener, state, shutdown.clone())),
            acquisition: tokio::spawn(acquisition.run(shutdown.clone())),
            shutdown,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .expect("WebSocket handshake");
        ws
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.acquisition.await.unwrap().unwrap();
        self.server.await.unwrap().unwrap();
        assert_eq!(*self.state.borrow(), LoopState::Stopped);
    }
}

async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn recv_type(ws: &mut Client, ty: &str) -> Value {
    loop {
        let value = recv_json(ws).await;
        if value["type"] == ty {
            return value;
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn subscriber_receives_engagement_packets() {
    let bridge = TestBridge::start().await;
    let mut ws = bridge.connect("/").await;

    let hello = recv_json(&mut ws).await;
    assert_eq!(hello, json!({"type": "hello", "mode": "normal"}));
    send_json(&mut ws, json!({"type": "subscribe"})).await;

    let first = recv_type(&mut ws, "engagement").await;
    assert_eq!(first["fs"], 250);
    assert_eq!(first["mode"], "normal");
    let e = first["E"].as_f64().unwrap();
    assert!(first["Emin"].as_f64().unwrap() <= e && e <= first["Emax"].as_f64().unwrap());
    for key in ["ts", "alpha", "theta", "beta"] {
        assert!(first[key].is_number(), "missing {}", key);
    }

    let second = recv_type(&mut ws, "engagement").await;
    let e_norm = second["Enorm"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&e_norm));
    assert!(second["ts"].as_i64().unwrap() >= first["ts"].as_i64().unwrap());

    bridge.stop().await;
}

#[tokio::test]
async fn reset_from_one_client_reaches_all_three() {
    let bridge = TestBridge::start().await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut ws = bridge.connect("/").await;
        assert_eq!(recv_json(&mut ws).await["type"], "hello");
        send_json(&mut ws, json!({"type": "subscribe"})).await;
        clients.push(ws);
    }
    for ws in clients.iter_mut() {
        recv_type(ws, "engagement").await;
    }

    send_json(&mut clients[0], json!({"type": "reset_norm"})).await;
    for ws in clients.iter_mut() {
        let notice = recv_type(ws, "calibration").await;
        assert_eq!(
            notice,
            json!({"type": "calibration", "mode": "normal", "Emin": null, "Emax": null})
        );
    }

    let after = recv_type(&mut clients[1], "engagement").await;
    assert_eq!(after["Enorm"], 0.5);
    assert_eq!(after["Emin"], after["Emax"]);

    bridge.stop().await;
}

#[tokio::test]
async fn mode_change_is_announced_to_unsubscribed_clients() {
    let bridge = TestBridge::start().await;
    let mut controller = bridge.connect("/").await;
    let mut watcher = bridge.connect("/ws").await;
    recv_json(&mut controller).await;
    recv_json(&mut watcher).await;

    send_json(&mut controller, json!({"type": "set_mode", "mode": "relax"})).await;
    let notice = recv_json(&mut watcher).await;
    assert_eq!(notice["type"], "calibration");
    assert_eq!(notice["mode"], "relax");

    send_json(&mut watcher, json!({"type": "subscribe"})).await;
    let packet = recv_type(&mut watcher, "engagement").await;
    assert_eq!(packet["mode"], "relax");

    bridge.stop().await;
}

#[tokio::test]
async fn malformed_messages_do_not_close_the_connection() {
    let bridge = TestBridge::start().await;
    let mut ws = bridge.connect("/").await;
    recv_json(&mut ws).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    send_json(&mut ws, json!({"type": "bogus"})).await;
    send_json(&mut ws, json!({"type": "set_mode", "mode": "sleepy"})).await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    send_json(&mut ws, json!({"type": "subscribe"})).await;

    let packet = recv_type(&mut ws, "engagement").await;
    assert_eq!(packet["mode"], "normal");

    bridge.stop().await;
}

#[tokio::test]
async fn shutdown_closes_client_connections() {
    let bridge = TestBridge::start().await;
    let mut ws = bridge.connect("/").await;
    recv_json(&mut ws).await;

    // Returns only after the connection task has sent its Close frame.
    bridge.stop().await;

    loop {
        match timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("connection was not closed")
        {
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Text(_))) => continue,
            other => panic!("expected a Close frame, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn stalled_client_is_disconnected() {
    let bridge = TestBridge::start_with(BridgeConfig {
        ws_addr: "ws://127.0.0.1:0".to_string(),
        pull_interval_ms: 1,
        output_interval_ms: 1,
        window_secs: 0.05,
        subscriber_queue_capacity: 1,
        max_consecutive_overflows: 0,
        device: DeviceConfig {
            sample_rate: 4000,
            channel_count: 8,
            ..DeviceConfig::default()
        },
        ..BridgeConfig::default()
    })
    .await;

    // A small receive buffer so the server's writes back up quickly.
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(2048).unwrap();
    let stream = socket.connect(bridge.addr.parse().unwrap()).await.unwrap();
    let (mut stalled, _) = client_async(format!("ws://{}/", bridge.addr), stream)
        .await
        .expect("WebSocket handshake");
    stalled
        .send(Message::Text(json!({"type": "subscribe"}).to_string()))
        .await
        .unwrap();

    let mut watcher = bridge.connect("/").await;
    recv_json(&mut watcher).await;

    // Never read; packets pile up until the bridge gives up on the client.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let drained = timeout(Duration::from_secs(10), async {
        loop {
            match stalled.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "stalled client was never disconnected");

    // Other connections are unaffected.
    send_json(&mut watcher, json!({"type": "set_mode", "mode": "mental"})).await;
    let notice = recv_type(&mut watcher, "calibration").await;
    assert_eq!(notice["mode"], "mental");

    bridge.stop().await;
}
