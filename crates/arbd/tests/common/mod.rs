#![allow(dead_code)]

use arb_common::Message;
use arbd::config::ArbiterConfig;
use arbd::netlog::NetworkLog;
use arbd::policy::PermissionTable;
use arbd::server::ArbiterState;
use arbd::transport::{Listener, WsListener};
use arbd::ArbiterError;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub fn test_config(devices: Vec<String>) -> ArbiterConfig {
    ArbiterConfig {
        name: "A1".to_string(),
        devices,
        listen: "127.0.0.1:0".parse().unwrap(),
        device_port: 5007,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        flush_interval: 30,
        connect_timeout: 2,
        handshake_timeout: 2,
        drain_timeout: 5,
    }
}

pub fn make_state(config: ArbiterConfig, table: Arc<PermissionTable>) -> Arc<ArbiterState> {
    Arc::new(ArbiterState::new(
        config,
        table,
        NetworkLog::new(Box::new(std::io::sink()), false),
    ))
}

pub struct TestArbiter {
    pub addr: SocketAddr,
    pub state: Arc<ArbiterState>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<(), ArbiterError>>,
}

impl TestArbiter {
    pub async fn start(config: ArbiterConfig, table: Arc<PermissionTable>) -> Self {
        let listener = WsListener::bind(config.listen, config.handshake_deadline())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let state = make_state(config, table);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(arbd::run_with_shutdown(
            listener,
            state.clone(),
            shutdown_rx,
        ));

        Self {
            addr,
            state,
            shutdown_tx,
            handle,
        }
    }

    pub async fn stop(self) -> Result<(), ArbiterError> {
        self.shutdown_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("arbiter did not stop")
            .unwrap()
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.state.registry.len() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} connections, have {}",
                self.state.registry.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub async fn start_arbiter() -> TestArbiter {
    TestArbiter::start(test_config(Vec::new()), Arc::new(PermissionTable::new())).await
}

/// A device speaking the arbiter protocol over a raw WebSocket.
pub struct TestDevice<S> {
    ws: WebSocketStream<S>,
}

impl TestDevice<MaybeTlsStream<TcpStream>> {
    /// Dial the arbiter's inbound port.
    pub async fn connect(addr: &SocketAddr) -> Self {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        Self { ws }
    }
}

impl<S> TestDevice<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send(&mut self, msg: &Message) {
        self.send_raw(msg.serialize().unwrap()).await;
    }

    pub async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.ws.send(WsMessage::Binary(bytes)).await.unwrap();
    }

    /// Next message from the arbiter, or `None` once it closed the link.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timeout waiting for message");
            match next {
                Some(Ok(WsMessage::Binary(data))) => return Some(Message::parse(&data).unwrap()),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(other)) => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Option<Message>> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A device waiting for the arbiter to dial it.
pub struct DeviceServer {
    listener: TcpListener,
}

impl DeviceServer {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    pub async fn accept(&self) -> TestDevice<TcpStream> {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("arbiter never connected")
            .unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        TestDevice { ws }
    }
}
