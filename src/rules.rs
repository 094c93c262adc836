//! Action validation and application.
//!
//! The [`Rules`] trait is the seam to the rules engine: it decides whether a
//! seat may take an action and produces the next [`MatchState`] when it may.
//! [`StandardRules`] covers turn and tile ownership for discards and draws;
//! scoring and claim rules belong to a fuller engine plugged in behind the
//! same trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorCode;
use crate::protocol::MatchEvent;
use crate::state::MatchState;
use crate::tile::{TileId, Wind};

/// An action a seat can take on its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Discard a tile from the hand or the draw slot.
    Discard(TileId),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Discard(tile) => write!(f, "discard {tile}"),
        }
    }
}

/// Why an action (or authoritative event) cannot be applied to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The acting seat does not hold the turn.
    #[error("seat {seat} acted during {current}'s turn")]
    NotYourTurn { seat: Wind, current: Wind },

    /// The tile is neither in the seat's hand nor in its draw slot.
    #[error("seat {seat} does not hold tile {tile}")]
    TileNotHeld { seat: Wind, tile: TileId },

    /// The seat already holds a drawn tile.
    #[error("seat {seat} already holds a drawn tile")]
    DrawSlotOccupied { seat: Wind },

    /// The tile is already somewhere in the match.
    #[error("tile {tile} is already in play")]
    TileInPlay { tile: TileId },

    /// The tile id is outside the standard set.
    #[error("tile {tile} is not part of the set")]
    UnknownTile { tile: TileId },
}

impl RejectReason {
    /// The wire code matching this reason.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotYourTurn { .. } => ErrorCode::NotYourTurn,
            Self::TileNotHeld { .. } => ErrorCode::TileNotHeld,
            Self::DrawSlotOccupied { .. } => ErrorCode::DrawSlotOccupied,
            Self::TileInPlay { .. } | Self::UnknownTile { .. } => ErrorCode::InvalidRequest,
        }
    }
}

/// The rules engine consumed by [`MatchSession`](crate::session::MatchSession).
///
/// Implementations must be pure: the same inputs always produce the same
/// output, and the input state is never modified.
pub trait Rules: Send + Sync + 'static {
    /// Decide whether `seat` may take `action` in `state`.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] that makes the action illegal.
    fn check(&self, state: &MatchState, seat: Wind, action: &Action) -> Result<(), RejectReason>;

    /// Produce the state that follows `seat` taking `action`.
    ///
    /// # Errors
    ///
    /// Returns the same reason [`check`](Rules::check) would.
    fn apply(
        &self,
        state: &MatchState,
        seat: Wind,
        action: &Action,
    ) -> Result<MatchState, RejectReason>;

    /// Produce the state that follows an authoritative event.
    ///
    /// # Errors
    ///
    /// Returns a [`RejectReason`] if the event contradicts the local state.
    fn apply_event(
        &self,
        state: &MatchState,
        event: &MatchEvent,
    ) -> Result<MatchState, RejectReason>;

    /// Returns `true` if `seat` may take `action` in `state`.
    fn can_apply(&self, state: &MatchState, seat: Wind, action: &Action) -> bool {
        self.check(state, seat, action).is_ok()
    }
}

/// Turn and tile ownership rules for discarding and drawing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl StandardRules {
    fn check_discard(state: &MatchState, seat: Wind, tile: TileId) -> Result<(), RejectReason> {
        if !state.is_turn(seat) {
            return Err(RejectReason::NotYourTurn {
                seat,
                current: state.current_turn,
            });
        }
        if !state.player(seat).holds(tile) {
            return Err(RejectReason::TileNotHeld { seat, tile });
        }
        Ok(())
    }

    fn discard(state: &MatchState, seat: Wind, tile: TileId) -> Result<MatchState, RejectReason> {
        Self::check_discard(state, seat, tile)?;

        let mut next = state.clone();
        let player = &mut next.players[seat];
        if player.current_draw == Some(tile) {
            player.current_draw = None;
        } else {
            let position = player
                .hand
                .iter()
                .position(|held| *held == tile)
                .ok_or(RejectReason::TileNotHeld { seat, tile })?;
            player.hand.remove(position);
            // The drawn tile stays with the seat once something else leaves.
            if let Some(drawn) = player.current_draw.take() {
                player.hand.push(drawn);
            }
        }
        player.discards.push(tile);

        next.current_turn = seat.next();
        next.revision += 1;
        Ok(next)
    }

    fn draw(state: &MatchState, seat: Wind, tile: TileId) -> Result<MatchState, RejectReason> {
        if !state.is_turn(seat) {
            return Err(RejectReason::NotYourTurn {
                seat,
                current: state.current_turn,
            });
        }
        if !tile.is_valid() {
            return Err(RejectReason::UnknownTile { tile });
        }
        if state.player(seat).current_draw.is_some() {
            return Err(RejectReason::DrawSlotOccupied { seat });
        }
        let in_play = state.players.iter().any(|(_, player)| {
            player.holds(tile) || player.discards.contains(&tile)
        });
        if in_play {
            return Err(RejectReason::TileInPlay { tile });
        }

        let mut next = state.clone();
        next.players[seat].current_draw = Some(tile);
        next.revision += 1;
        Ok(next)
    }
}

impl Rules for StandardRules {
    fn check(&self, state: &MatchState, seat: Wind, action: &Action) -> Result<(), RejectReason> {
        match *action {
            Action::Discard(tile) => Self::check_discard(state, seat, tile),
        }
    }

    fn apply(
        &self,
        state: &MatchState,
        seat: Wind,
        action: &Action,
    ) -> Result<MatchState, RejectReason> {
        match *action {
            Action::Discard(tile) => Self::discard(state, seat, tile),
        }
    }

    fn apply_event(
        &self,
        state: &MatchState,
        event: &MatchEvent,
    ) -> Result<MatchState, RejectReason> {
        match *event {
            MatchEvent::TileDrawn { seat, tile } => Self::draw(state, seat, tile),
            MatchEvent::TileDiscarded { seat, tile } => Self::discard(state, seat, tile),
        }
    }
}
