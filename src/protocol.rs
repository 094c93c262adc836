//! Wire types and codec for the match protocol.
//!
//! Every message is a JSON text frame, adjacently tagged as
//! `{"type": "<Variant>", "data": {...}}`. The client sends
//! [`ClientRequest`]s; the authority answers with [`ServerMessage`]s and may
//! push [`MatchEvent`]s between replies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MatchError, Result};
use crate::error_codes::ErrorCode;
use crate::rules::Action;
use crate::state::MatchState;
use crate::tile::{TileId, Wind};

// ── Structs ─────────────────────────────────────────────────────────

/// Account credentials issued by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub id: Uuid,
    pub token: String,
}

/// A seat discarding one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardTileRequest {
    pub player: Wind,
    pub tile: TileId,
    /// Per-session sequence number, echoed back in the verdict.
    #[serde(default)]
    pub request_id: u64,
}

/// Reply to [`ClientRequest::StartMatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMatchResponse {
    /// The full initial state of the match.
    pub state: MatchState,
    /// New credentials, issued when the request carried none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Events pushed by the authority outside the request/response flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum MatchEvent {
    /// A seat drew a tile into its draw slot.
    TileDrawn { seat: Wind, tile: TileId },
    /// A seat discarded a tile.
    TileDiscarded { seat: Wind, tile: TileId },
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientRequest {
    /// Start a match (MUST be the first request of a session).
    StartMatch {
        /// Version of the client, checked by the authority.
        client_version: String,
        /// Saved credentials; `None` asks the authority to issue new ones.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<Credentials>,
    },
    /// Discard a tile.
    DiscardTile(DiscardTileRequest),
}

impl ClientRequest {
    /// The request describing `seat` taking `action`, tagged `request_id`.
    pub fn for_action(request_id: u64, seat: Wind, action: &Action) -> Self {
        match *action {
            Action::Discard(tile) => Self::DiscardTile(DiscardTileRequest {
                player: seat,
                tile,
                request_id,
            }),
        }
    }
}

/// Message types sent from authority to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// The match started (boxed to reduce enum size).
    MatchStarted(Box<StartMatchResponse>),
    /// Verdict on a discard request.
    DiscardResult {
        accepted: bool,
        /// The `request_id` being answered. Authorities that leave it out
        /// answer requests in the order they were sent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Authoritative state, when it differs from the client's prediction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Box<MatchState>>,
    },
    /// Something happened in the match.
    MatchEvent(MatchEvent),
    /// The authority could not process the last request.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    /// A start reply carrying `state`.
    pub fn match_started(state: MatchState) -> Self {
        Self::MatchStarted(Box::new(StartMatchResponse {
            state,
            credentials: None,
        }))
    }

    /// A plain acceptance of the last action.
    pub fn accepted() -> Self {
        Self::DiscardResult {
            accepted: true,
            request_id: None,
            error_code: None,
            reason: None,
            state: None,
        }
    }

    /// An acceptance that replaces the client's prediction with `state`.
    pub fn accepted_with_state(state: MatchState) -> Self {
        Self::DiscardResult {
            accepted: true,
            request_id: None,
            error_code: None,
            reason: None,
            state: Some(Box::new(state)),
        }
    }

    /// A refusal of the last action.
    pub fn rejected(error_code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::DiscardResult {
            accepted: false,
            request_id: None,
            error_code: Some(error_code),
            reason: Some(reason.into()),
            state: None,
        }
    }

    /// Tag a verdict with the request it answers. Other messages are
    /// returned unchanged.
    #[must_use]
    pub fn answering(mut self, id: u64) -> Self {
        if let Self::DiscardResult { request_id, .. } = &mut self {
            *request_id = Some(id);
        }
        self
    }
}

// ── Verdicts ────────────────────────────────────────────────────────

/// The authority's verdict on one action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionVerdict {
    pub accepted: bool,
    /// The request this verdict answers, when the authority says so.
    pub request_id: Option<u64>,
    pub error_code: Option<ErrorCode>,
    pub reason: Option<String>,
    /// Corrected state sent along with the verdict.
    pub corrected: Option<MatchState>,
}

/// One inbound frame received while an action awaits its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReply {
    Verdict(ActionVerdict),
    Event(MatchEvent),
}

// ── Codec ───────────────────────────────────────────────────────────

/// Serialize a request for the wire.
///
/// # Errors
///
/// Returns [`MatchError::Serialization`] if serialization fails.
pub fn encode_request(request: &ClientRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Serialize an authority message for the wire.
///
/// # Errors
///
/// Returns [`MatchError::Serialization`] if serialization fails.
pub fn encode_server_message(message: &ServerMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Parse one authority frame, validating any state it carries.
///
/// # Errors
///
/// Returns [`MatchError::MalformedResponse`] if the text is not a valid
/// message, or [`MatchError::InvalidState`] if an embedded state breaks the
/// match invariants. Both carry the raw payload.
pub fn decode_server_message(text: &str) -> Result<ServerMessage> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|source| MatchError::MalformedResponse {
            raw: text.to_owned(),
            source,
        })?;

    let embedded = match &message {
        ServerMessage::MatchStarted(response) => Some(&response.state),
        ServerMessage::DiscardResult { state, .. } => state.as_deref(),
        ServerMessage::MatchEvent(_) | ServerMessage::Error { .. } => None,
    };
    if let Some(state) = embedded {
        state
            .validate()
            .map_err(|source| MatchError::InvalidState {
                raw: text.to_owned(),
                source,
            })?;
    }

    Ok(message)
}

/// Parse the reply to [`ClientRequest::StartMatch`].
///
/// # Errors
///
/// Any error of [`decode_server_message`], [`MatchError::ServerError`] if the
/// authority reported an error, or [`MatchError::UnexpectedMessage`] for any
/// other message.
pub fn decode_start_response(text: &str) -> Result<StartMatchResponse> {
    match decode_server_message(text)? {
        ServerMessage::MatchStarted(response) => Ok(*response),
        ServerMessage::Error {
            message,
            error_code,
        } => Err(MatchError::ServerError {
            message,
            error_code,
        }),
        ServerMessage::DiscardResult { .. } | ServerMessage::MatchEvent(_) => {
            Err(MatchError::UnexpectedMessage {
                raw: text.to_owned(),
            })
        }
    }
}

/// Parse a frame received while an action awaits its verdict.
///
/// # Errors
///
/// Any error of [`decode_server_message`], [`MatchError::ServerError`] if the
/// authority reported an error, or [`MatchError::UnexpectedMessage`] for a
/// start reply.
pub fn decode_action_reply(text: &str) -> Result<ActionReply> {
    match decode_server_message(text)? {
        ServerMessage::DiscardResult {
            accepted,
            request_id,
            error_code,
            reason,
            state,
        } => Ok(ActionReply::Verdict(ActionVerdict {
            accepted,
            request_id,
            error_code,
            reason,
            corrected: state.map(|state| *state),
        })),
        ServerMessage::MatchEvent(event) => Ok(ActionReply::Event(event)),
        ServerMessage::Error {
            message,
            error_code,
        } => Err(MatchError::ServerError {
            message,
            error_code,
        }),
        ServerMessage::MatchStarted(_) => Err(MatchError::UnexpectedMessage {
            raw: text.to_owned(),
        }),
    }
}

/// Parse the verdict on an action request.
///
/// # Errors
///
/// Any error of [`decode_action_reply`], or [`MatchError::UnexpectedMessage`]
/// if the frame is an event rather than a verdict.
pub fn decode_action_response(text: &str) -> Result<ActionVerdict> {
    match decode_action_reply(text)? {
        ActionReply::Verdict(verdict) => Ok(verdict),
        ActionReply::Event(_) => Err(MatchError::UnexpectedMessage {
            raw: text.to_owned(),
        }),
    }
}
