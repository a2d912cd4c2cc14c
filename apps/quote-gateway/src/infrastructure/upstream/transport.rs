//! Upstream Transport
//!
//! A `Transport` opens one framed, bidirectional connection to an endpoint.
//! The production implementation is a tokio-tungstenite WebSocket; the
//! in-memory implementation lets the connector be driven without a socket.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, Sink, Stream, future};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

// =============================================================================
// Types
// =============================================================================

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The endpoint or one of its headers was invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The connection was refused.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The connection is gone.
    #[error("connection closed")]
    Closed,
}

/// A connection target with handshake headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// WebSocket URL.
    pub url: String,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
}

impl Endpoint {
    /// Endpoint without extra headers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A frame on an upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Text frame.
    Text(String),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close frame.
    Close,
}

/// Outbound half of a connection.
pub type WireSink = Pin<Box<dyn Sink<WireMessage, Error = TransportError> + Send>>;

/// Inbound half of a connection.
pub type WireStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// An open connection.
pub struct Connection {
    /// Frames to the provider.
    pub sink: WireSink,
    /// Frames from the provider.
    pub stream: WireStream,
}

/// Opens upstream connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// tokio-tungstenite transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl From<WireMessage> for Message {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::Text(text) => Self::Text(text.into()),
            WireMessage::Ping(data) => Self::Ping(data.into()),
            WireMessage::Pong(data) => Self::Pong(data.into()),
            WireMessage::Close => Self::Close(None),
        }
    }
}

fn from_ws(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text.to_string())),
        Message::Binary(data) => Some(WireMessage::Text(String::from_utf8_lossy(&data).into_owned())),
        Message::Ping(data) => Some(WireMessage::Ping(data.to_vec())),
        Message::Pong(data) => Some(WireMessage::Pong(data.to_vec())),
        Message::Close(_) => Some(WireMessage::Close),
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let mut request = endpoint.url.as_str().into_client_request()?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|message: WireMessage| future::ready(Ok::<_, TransportError>(Message::from(message))));
        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(message) => from_ws(message).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// =============================================================================
// In-Memory Transport
// =============================================================================

/// The provider side of an in-memory connection.
pub struct MemoryPeer {
    /// URL the client connected to.
    pub url: String,
    /// Handshake headers the client sent.
    pub headers: Vec<(String, String)>,
    to_client: fmpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    from_client: fmpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryPeer {
    /// Push a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(WireMessage::Text(text.into())));
    }

    /// Push any frame to the client.
    pub fn send(&self, message: WireMessage) {
        let _ = self.to_client.unbounded_send(Ok(message));
    }

    /// Push a transport error to the client.
    pub fn fail(&self) {
        let _ = self.to_client.unbounded_send(Err(TransportError::Closed));
    }

    /// Next frame the client sent, or `None` once the client hung up.
    pub async fn next_sent(&mut self) -> Option<WireMessage> {
        self.from_client.next().await
    }

    /// Next text frame the client sent, skipping control frames.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.from_client.next().await? {
                WireMessage::Text(text) => return Some(text),
                WireMessage::Close => return None,
                WireMessage::Ping(_) | WireMessage::Pong(_) => {}
            }
        }
    }

    /// Text frames already sent by the client, without waiting.
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(Some(message)) = self.from_client.next().now_or_never() {
            if let WireMessage::Text(text) = message {
                texts.push(text);
            }
        }
        texts
    }
}

#[derive(Default)]
struct MemoryState {
    fail_next: usize,
    rejected: HashSet<String>,
    attempts: Vec<String>,
}

/// Transport whose connections are in-process channels.
///
/// Every successful connect hands a [`MemoryPeer`] to [`MemoryTransport::accept`].
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a transport that accepts every connection.
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            peers_tx,
            peers_rx: Arc::new(tokio::sync::Mutex::new(peers_rx)),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Always refuse connections to `url`.
    pub fn reject_url(&self, url: impl Into<String>) {
        self.state.lock().rejected.insert(url.into());
    }

    /// URLs of every connection attempt so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().attempts.clone()
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        {
            let mut state = self.state.lock();
            state.attempts.push(endpoint.url.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::Refused(endpoint.url.clone()));
            }
            if state.rejected.contains(&endpoint.url) {
                return Err(TransportError::Refused(endpoint.url.clone()));
            }
        }

        let (to_client, client_rx) = fmpsc::unbounded();
        let (client_tx, from_client) = fmpsc::unbounded();

        let peer = MemoryPeer {
            url: endpoint.url.clone(),
            headers: endpoint.headers.clone(),
            to_client,
            from_client,
        };
        self.peers_tx
            .send(peer)
            .map_err(|_| TransportError::Refused(endpoint.url.clone()))?;

        Ok(Connection {
            sink: Box::pin(client_tx.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(client_rx),
        })
    }
}
