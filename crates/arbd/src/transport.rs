use crate::error::ArbiterError;
use arb_common::message::MAX_MESSAGE_SIZE;
use arb_common::Message;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Upgraded connections waiting to be picked up by `accept()`.
const ACCEPT_QUEUE: usize = 64;

/// One open, bidirectional message channel to a remote device.
pub trait Connection: Send + 'static {
    /// Remote address as a display string.
    fn peer(&self) -> &str;

    /// Send one message.
    fn send(&mut self, msg: &Message) -> impl Future<Output = Result<(), ArbiterError>> + Send;

    /// Wait for the next message. `Ok(None)` means the peer closed the stream.
    fn receive(&mut self) -> impl Future<Output = Result<Option<Message>, ArbiterError>> + Send;

    /// Release the underlying resource. Calling it again has no effect.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Source of inbound connections.
pub trait Listener: Send {
    /// Connection type produced by this listener.
    type Conn: Connection;

    /// Address the listener is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Wait for the next inbound connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Conn, ArbiterError>> + Send;
}

fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..WebSocketConfig::default()
    }
}

/// [`Connection`] over a WebSocket stream.
pub struct WsConnection<S> {
    ws: WebSocketStream<S>,
    peer: String,
    closed: bool,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket stream.
    pub fn new(ws: WebSocketStream<S>, peer: String) -> Self {
        Self {
            ws,
            peer,
            closed: false,
        }
    }
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&mut self, msg: &Message) -> Result<(), ArbiterError> {
        if self.closed {
            return Err(ArbiterError::ConnectionClosed);
        }
        let bytes = msg.serialize()?;
        self.ws.send(WsMessage::Binary(bytes)).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Message>, ArbiterError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Some(Message::parse(&data)?)),
                Some(Ok(WsMessage::Text(_))) => {
                    return Err(ArbiterError::Protocol("unexpected text frame"));
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ArbiterError::WebSocket(e)),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.ws.close(None).await {
            tracing::trace!(peer = %self.peer, "close handshake failed: {}", e);
        }
    }
}

/// Resolve a configured device address to `host:port`.
///
/// Addresses that already carry a port are used as-is; bare IPs and hostnames
/// get `default_port`.
#[must_use]
pub fn device_endpoint(addr: &str, default_port: u16) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    let has_port = addr
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if has_port {
        addr.to_string()
    } else {
        format!("{addr}:{default_port}")
    }
}

/// Open an outbound connection to a device.
///
/// # Errors
///
/// Returns [`ArbiterError::Connect`] if the device is unreachable, refuses
/// the WebSocket upgrade, or does not answer within `connect_timeout`.
pub async fn open(
    addr: &str,
    default_port: u16,
    connect_timeout: Duration,
) -> Result<WsConnection<MaybeTlsStream<TcpStream>>, ArbiterError> {
    let endpoint = device_endpoint(addr, default_port);
    let url = format!("ws://{endpoint}");

    let (ws, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
        .await
        .map_err(|_| ArbiterError::Connect {
            addr: addr.to_string(),
            reason: "timed out".to_string(),
        })?
        .map_err(|e| ArbiterError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    Ok(WsConnection::new(ws, endpoint))
}

/// [`Listener`] accepting WebSocket connections on a TCP port.
///
/// Upgrades run in their own tasks, bounded by the handshake timeout, so a
/// slow peer never holds up `accept()`.
pub struct WsListener {
    inner: TcpListener,
    local_addr: SocketAddr,
    handshake_timeout: Duration,
    ready_tx: mpsc::Sender<WsConnection<TcpStream>>,
    ready_rx: mpsc::Receiver<WsConnection<TcpStream>>,
}

impl WsListener {
    /// Bind the inbound port.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, handshake_timeout: Duration) -> Result<Self, ArbiterError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ArbiterError::Bind { addr, source })?;
        let local_addr = inner.local_addr()?;
        let (ready_tx, ready_rx) = mpsc::channel(ACCEPT_QUEUE);
        Ok(Self {
            inner,
            local_addr,
            handshake_timeout,
            ready_tx,
            ready_rx,
        })
    }
}

impl Listener for WsListener {
    type Conn = WsConnection<TcpStream>;

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn accept(&mut self) -> Result<Self::Conn, ArbiterError> {
        loop {
            tokio::select! {
                result = self.inner.accept() => {
                    let (stream, peer_addr) = result.map_err(ArbiterError::Accept)?;
                    let ready_tx = self.ready_tx.clone();
                    let handshake_timeout = self.handshake_timeout;
                    tokio::spawn(async move {
                        let upgrade = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config()));
                        match timeout(handshake_timeout, upgrade).await {
                            Ok(Ok(ws)) => {
                                let conn = WsConnection::new(ws, peer_addr.to_string());
                                if ready_tx.send(conn).await.is_err() {
                                    tracing::debug!(peer = %peer_addr, "listener gone, dropping connection");
                                }
                            }
                            Ok(Err(e)) => {
                                tracing::debug!(peer = %peer_addr, "websocket handshake failed: {}", e);
                            }
                            Err(_) => {
                                tracing::debug!(peer = %peer_addr, "websocket handshake timed out");
                            }
                        }
                    });
                }
                Some(conn) = self.ready_rx.recv() => return Ok(conn),
            }
        }
    }
}
