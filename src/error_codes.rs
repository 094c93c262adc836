//! Error codes shared by local action checks and authority verdicts.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"NOT_YOUR_TURN"`)
//! so the client and the authority agree on them over the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured reason attached to a refused action or a failed request.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Action errors
    NotYourTurn,
    TileNotHeld,
    DrawSlotOccupied,

    // Match errors
    NotInMatch,
    AlreadyInMatch,
    MatchOver,

    // Handshake errors
    IncompatibleClientVersion,
    InvalidCredentials,

    // Authority errors
    InvalidRequest,
    InternalError,

    /// A code this client does not know, e.g. from a newer authority.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotYourTurn => "It is not this seat's turn to act.",
            Self::TileNotHeld => "The tile is not in this seat's hand or draw slot.",
            Self::DrawSlotOccupied => "The seat already holds a drawn tile.",
            Self::NotInMatch => "The client is not part of an active match.",
            Self::AlreadyInMatch => "The client is already playing a match.",
            Self::MatchOver => "The match has already finished.",
            Self::IncompatibleClientVersion => {
                "The client version is not supported by the server. Please update the game."
            }
            Self::InvalidCredentials => {
                "The saved credentials were not recognized. A new account will be created."
            }
            Self::InvalidRequest => "The server could not understand the request.",
            Self::InternalError => "The server hit an internal error. Please try again.",
            Self::Unknown => "The server sent an unrecognized error code.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
