//! WebSocket transport using `tokio-tungstenite`.
//!
//! The match authority speaks JSON over WebSocket text frames. Both `ws://`
//! and `wss://` URLs are accepted; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! Only available with the `transport-websocket` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::error::MatchError;
use crate::transport::Transport;

/// Client-side WebSocket stream, plain or TLS.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] speaking to the match authority over WebSocket.
///
/// [`connect`](WebSocketTransport::connect) covers the usual case;
/// [`from_stream`](WebSocketTransport::from_stream) wraps a stream that needed
/// custom setup (TLS roots, proxy headers).
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) only awaits `StreamExt::next`, so dropping it
/// mid-wait never loses a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    /// `None` once closed.
    stream: Option<WsStream>,
}

fn connect_error(e: tokio_tungstenite::tungstenite::Error) -> MatchError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    MatchError::Io(std::io::Error::new(kind, e))
}

impl WebSocketTransport {
    /// Open a WebSocket connection to the authority at `url`.
    ///
    /// # Errors
    ///
    /// [`MatchError::Io`] for a bad URL or a failed handshake; the I/O error
    /// kind is preserved when there is one.
    pub async fn connect(url: &str) -> Result<Self, MatchError> {
        debug!(%url, "connecting to match authority");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(connect_error)?;
        info!(%url, "connected to match authority");
        Ok(Self::from_stream(stream))
    }

    /// [`connect`](Self::connect) with a deadline.
    ///
    /// # Errors
    ///
    /// [`MatchError::Timeout`] when `timeout` elapses first, otherwise
    /// whatever [`connect`](Self::connect) returns.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, MatchError> {
        match tokio::time::timeout(timeout, Self::connect(url)).await {
            Ok(connected) => connected,
            Err(_) => Err(MatchError::Timeout),
        }
    }

    /// Wrap an already-open stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), MatchError> {
        let stream = self.stream.as_mut().ok_or(MatchError::TransportClosed)?;
        stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| MatchError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, MatchError>> {
        let stream = self.stream.as_mut()?;
        while let Some(incoming) = stream.next().await {
            match incoming {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(close)) => {
                    debug!(?close, "authority closed the connection");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    warn!(len = bytes.len(), "ignoring binary frame from authority");
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(MatchError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), MatchError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .close(None)
            .await
            .map_err(|e| MatchError::TransportSend(e.to_string()))
    }
}
