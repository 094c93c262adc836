//! Built-in [`Transport`](crate::transport::Transport) implementations.
//!
//! - [`ChannelTransport`]: in-process pair with an [`AuthorityEnd`], always
//!   available.
//! - [`WebSocketTransport`]: `ws://` / `wss://`, behind the default
//!   `transport-websocket` feature.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), mahjong_match_client::MatchError> {
//! use mahjong_match_client::{channel_pair, Transport};
//!
//! let (mut client, mut authority) = channel_pair();
//! client.send(r#"{"type":"StartMatch","data":{"client_version":"0.1.0"}}"#.into()).await?;
//!
//! if let Some(frame) = authority.recv().await {
//!     println!("authority got: {frame}");
//! }
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use channel::{channel_pair, AuthorityEnd, ChannelTransport};

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
