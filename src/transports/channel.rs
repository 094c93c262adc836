//! In-process transport backed by tokio channels.
//!
//! [`channel_pair`] returns a connected `(ChannelTransport, AuthorityEnd)`:
//! the client half implements [`Transport`] and is handed to a session, the
//! authority half reads what the client sent and injects replies. Useful for
//! tests, demos and authorities running in the same process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{MatchError, Result};
use crate::protocol::{encode_server_message, ServerMessage};
use crate::transport::Transport;

/// Client half of an in-process channel pair.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) wraps [`mpsc::UnboundedReceiver::recv`], which is
/// cancel-safe.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Authority half of an in-process channel pair.
#[derive(Debug)]
pub struct AuthorityEnd {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

/// Create a connected `(transport, authority)` pair.
pub fn channel_pair() -> (ChannelTransport, AuthorityEnd) {
    // Client → authority
    let (client_tx, authority_rx) = mpsc::unbounded_channel();
    // Authority → client
    let (authority_tx, client_rx) = mpsc::unbounded_channel();

    let transport = ChannelTransport {
        tx: Some(client_tx),
        rx: client_rx,
    };
    let authority = AuthorityEnd {
        rx: authority_rx,
        tx: authority_tx,
    };
    (transport, authority)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(MatchError::TransportClosed)?;
        tx.send(message)
            .map_err(|e| MatchError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

impl AuthorityEnd {
    /// Wait for the next frame the client sent. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Send a raw text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::TransportClosed`] if the client half is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(text.into())
            .map_err(|_| MatchError::TransportClosed)
    }

    /// Serialize and send a message to the client.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Serialization`] or [`MatchError::TransportClosed`].
    pub fn send(&self, message: &ServerMessage) -> Result<()> {
        self.send_text(encode_server_message(message)?)
    }
}
