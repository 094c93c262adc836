//! # Mahjong Match Client
//!
//! Client-side match synchronization for a turn-based mahjong game.
//!
//! A [`MatchSession`] keeps a predicted copy of the match state in step with a
//! remote authority over any bidirectional text [`Transport`]:
//!
//! - **Optimistic**: legal actions are applied and shown before the authority
//!   answers
//! - **Reconciled**: rejected or failed actions roll back to the pre-action
//!   state; corrected states replace the prediction
//! - **Scoped**: one cancellation token ends every pending await when the
//!   session is torn down
//! - **Event-driven**: the view layer receives typed [`SessionEvent`]s via a
//!   channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mahjong_match_client::{MatchSession, SessionConfig, WebSocketTransport, Wind};
//!
//! let transport = WebSocketTransport::connect("ws://localhost:3030/client").await?;
//! let (mut session, mut events) = MatchSession::new(transport, SessionConfig::new());
//! session.start().await?;
//!
//! let tile = session.view().unwrap().seats[0].hand[0].id;
//! session.discard(Wind::East, tile).await?;
//! ```

pub mod error;
pub mod error_codes;
pub mod protocol;
pub mod rules;
pub mod session;
pub mod state;
pub mod tile;
pub mod transport;
pub mod transports;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use error::{MatchError, Result};
pub use error_codes::ErrorCode;
pub use protocol::{ClientRequest, Credentials, MatchEvent, ServerMessage};
pub use rules::{Action, RejectReason, Rules, StandardRules};
pub use session::{ActionOutcome, MatchSession, SessionConfig, SessionEvent, SessionPhase};
pub use state::{MatchState, PlayerState};
pub use tile::{Tile, TileId, Wind};
pub use transport::Transport;
pub use transports::{channel_pair, AuthorityEnd, ChannelTransport};
pub use view::MatchView;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
