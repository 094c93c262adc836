#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for match client integration tests.
//!
//! Provides a scripted [`MockTransport`], a standard opening position and
//! helpers for building authority replies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use mahjong_match_client::protocol::{encode_server_message, ClientRequest, MatchEvent};
use mahjong_match_client::{
    ErrorCode, MatchError, MatchState, ServerMessage, TileId, Transport, Wind,
};

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport for integration testing.
///
/// Scripted authority replies are consumed in order by `recv()`.
/// All frames sent by the client are recorded in `sent`.
pub struct MockTransport {
    /// Scripted replies (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, MatchError>>>,
    /// Recorded outgoing frames from the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a mock transport with the given scripted replies.
    ///
    /// Returns the transport plus shared handles for inspecting sent frames
    /// and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, MatchError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), MatchError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, MatchError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // Out of script: behave like an authority that never answers.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), MatchError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Decode every frame the client sent.
pub fn sent_requests(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientRequest> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|text| serde_json::from_str(text).expect("client sent invalid JSON"))
        .collect()
}

// ── Fixtures ────────────────────────────────────────────────────────

/// East's hand in the opening position.
pub const EAST_HAND: [TileId; 3] = [TileId(0), TileId(4), TileId(40)];
/// East's drawn tile in the opening position.
pub const EAST_DRAW: TileId = TileId(108);
/// South's hand in the opening position.
pub const SOUTH_HAND: [TileId; 2] = [TileId(1), TileId(135)];

/// A small opening position: East to act, holding three tiles and a draw.
pub fn opening_state() -> MatchState {
    let mut state = MatchState::new(uuid::Uuid::from_u128(42), Wind::East);
    state.players[Wind::East].hand = EAST_HAND.to_vec();
    state.players[Wind::East].current_draw = Some(EAST_DRAW);
    state.players[Wind::South].hand = SOUTH_HAND.to_vec();
    state
}

// ── JSON helper functions ───────────────────────────────────────────

fn to_json(message: &ServerMessage) -> String {
    encode_server_message(message).expect("server message serialization")
}

/// `MatchStarted` carrying `state`.
pub fn match_started_json(state: MatchState) -> String {
    to_json(&ServerMessage::match_started(state))
}

/// `MatchStarted` carrying the opening position.
pub fn opening_json() -> String {
    match_started_json(opening_state())
}

/// A plain acceptance of the last action.
pub fn accepted_json() -> String {
    to_json(&ServerMessage::accepted())
}

/// An acceptance of the request tagged `request_id`.
pub fn accepted_for_json(request_id: u64) -> String {
    to_json(&ServerMessage::accepted().answering(request_id))
}

/// An acceptance that carries an authoritative state.
pub fn accepted_with_state_json(state: MatchState) -> String {
    to_json(&ServerMessage::accepted_with_state(state))
}

/// A refusal of the last action.
pub fn rejected_json(code: ErrorCode, reason: &str) -> String {
    to_json(&ServerMessage::rejected(code, reason))
}

/// A refusal that carries the authority's own state.
pub fn rejected_with_state_json(code: ErrorCode, reason: &str, state: MatchState) -> String {
    to_json(&ServerMessage::DiscardResult {
        accepted: false,
        request_id: None,
        error_code: Some(code),
        reason: Some(reason.into()),
        state: Some(Box::new(state)),
    })
}

/// A pushed match event.
pub fn event_json(event: MatchEvent) -> String {
    to_json(&ServerMessage::MatchEvent(event))
}

/// An authority error.
pub fn error_json(message: &str) -> String {
    to_json(&ServerMessage::Error {
        message: message.into(),
        error_code: Some(ErrorCode::InternalError),
    })
}
