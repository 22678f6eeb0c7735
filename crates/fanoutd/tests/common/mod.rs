#![allow(dead_code)]

use fanoutd::{Controller, RelayConfig, RunningRelay, Startup};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;

/// Fresh runtime directory under the system temp dir.
pub fn temp_runtime_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fanout-test-{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Loopback config on ephemeral ports with short timings.
pub fn test_config(runtime_dir: PathBuf) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".parse().unwrap(),
        tcp_port: 0,
        udp_port: 0,
        ws_port: 0,
        runtime_dir,
        poll_interval: Duration::from_millis(50),
        join_timeout: Duration::from_millis(1000),
        subscriber_queue: 16,
        metrics_addr: None,
        log_tag: "fanout-test".to_string(),
    }
}

pub async fn start_relay_in(runtime_dir: PathBuf) -> RunningRelay {
    match Controller::new(test_config(runtime_dir)).start().await.unwrap() {
        Startup::Running(relay) => relay,
        Startup::AlreadyRunning { pid } => panic!("unexpected lock holder {pid}"),
    }
}

pub async fn start_relay() -> (RunningRelay, PathBuf) {
    let dir = temp_runtime_dir();
    (start_relay_in(dir.clone()).await, dir)
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A process that stays alive until killed; its PID stands in for another instance.
pub struct LiveProcess(std::process::Child);

impl LiveProcess {
    pub fn spawn() -> Self {
        Self(std::process::Command::new("sleep").arg("30").spawn().unwrap())
    }

    pub fn pid(&self) -> u32 {
        self.0.id()
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    /// Connect and consume the `connected` system event.
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr).await;
        let event = client.recv_json().await;
        assert_eq!(event["type"], "system");
        assert_eq!(event["event"], "connected");
        client
    }

    pub async fn connect_raw(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn recv_json(&mut self) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_json_timeout(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        tokio::time::timeout(timeout, self.recv_json()).await.ok()
    }

    /// Resolves once the server closes the connection.
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for close");
            match next {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}

/// Send one line over a fresh TCP connection and return the ACK line.
pub async fn tcp_send(addr: SocketAddr, text: &str) -> String {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(format!("{text}\n").as_bytes())
        .await
        .unwrap();
    let mut ack = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut ack))
        .await
        .expect("timeout waiting for tcp ack")
        .unwrap();
    ack.trim_end().to_string()
}

/// Send one datagram and return the ACK.
pub async fn udp_send(addr: SocketAddr, text: &str) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(text.as_bytes(), addr).await.unwrap();
    let mut buf = [0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timeout waiting for udp ack")
        .unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}
