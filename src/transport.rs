//! The seam between a [`MatchSession`](crate::session::MatchSession) and the
//! wire.
//!
//! A transport moves whole JSON frames to and from the match authority and
//! owns its own framing. Connecting is left to each implementation (a URL for
//! [`WebSocketTransport`](crate::transports::WebSocketTransport), nothing for
//! [`ChannelTransport`](crate::transports::ChannelTransport)); the session
//! only ever receives one that is already connected.
//!
//! # Writing a transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use mahjong_match_client::error::MatchError;
//! use mahjong_match_client::transport::Transport;
//!
//! /// Replays canned authority frames.
//! struct Replay(Vec<String>);
//!
//! #[async_trait]
//! impl Transport for Replay {
//!     async fn send(&mut self, _frame: String) -> Result<(), MatchError> {
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, MatchError>> {
//!         self.0.pop().map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), MatchError> {
//!         self.0.clear();
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::MatchError;

/// Frame-oriented, bidirectional link to the match authority.
///
/// One [`send`](Transport::send) is one request frame; one
/// [`recv`](Transport::recv) yields one reply or event frame. The trait is
/// object safe, and `Box<dyn Transport>` is itself a transport.
///
/// # Cancel Safety
///
/// The session races [`recv`](Transport::recv) against its cancellation token
/// in `tokio::select!`. Dropping a pending `recv` must not lose a frame: the
/// next call returns it. Receivers built on tokio channels or on
/// `StreamExt::next` already behave this way.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one frame.
    ///
    /// # Errors
    ///
    /// [`MatchError::TransportClosed`] once closed, otherwise
    /// [`MatchError::TransportSend`].
    async fn send(&mut self, frame: String) -> Result<(), MatchError>;

    /// Wait for the next frame.
    ///
    /// `None` means the authority closed the link cleanly; `Some(Err(_))`
    /// reports a broken one.
    async fn recv(&mut self) -> Option<Result<String, MatchError>>;

    /// Shut the link down. Must be idempotent and must release resources even
    /// when the close handshake fails.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure, if any.
    async fn close(&mut self) -> Result<(), MatchError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, frame: String) -> Result<(), MatchError> {
        (**self).send(frame).await
    }

    async fn recv(&mut self) -> Option<Result<String, MatchError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), MatchError> {
        (**self).close().await
    }
}
