//! Match state.
//!
//! [`MatchState`] is a plain value: every mutation goes through
//! [`Rules`](crate::rules::Rules) and produces a new value, so a speculative
//! state is rolled back by dropping it and keeping the previous one.

use std::collections::HashSet;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tile::{TileId, Wind};

/// Unique identifier for a match.
pub type MatchId = Uuid;

// ── Per-seat storage ────────────────────────────────────────────────

/// One value per seat, indexed by [`Wind`].
///
/// Serialized as an object keyed by seat name so that a payload missing a
/// seat (or naming one twice) fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeatMap<T> {
    #[serde(rename = "East")]
    east: T,
    #[serde(rename = "South")]
    south: T,
    #[serde(rename = "West")]
    west: T,
    #[serde(rename = "North")]
    north: T,
}

impl<T> SeatMap<T> {
    /// Build a map by calling `f` once per seat in seating order.
    pub fn from_fn(mut f: impl FnMut(Wind) -> T) -> Self {
        Self {
            east: f(Wind::East),
            south: f(Wind::South),
            west: f(Wind::West),
            north: f(Wind::North),
        }
    }

    /// Iterate over `(seat, value)` pairs in seating order.
    pub fn iter(&self) -> impl Iterator<Item = (Wind, &T)> {
        Wind::ALL.into_iter().map(move |seat| (seat, &self[seat]))
    }
}

impl<T> Index<Wind> for SeatMap<T> {
    type Output = T;

    fn index(&self, seat: Wind) -> &T {
        match seat {
            Wind::East => &self.east,
            Wind::South => &self.south,
            Wind::West => &self.west,
            Wind::North => &self.north,
        }
    }
}

impl<T> IndexMut<Wind> for SeatMap<T> {
    fn index_mut(&mut self, seat: Wind) -> &mut T {
        match seat {
            Wind::East => &mut self.east,
            Wind::South => &mut self.south,
            Wind::West => &mut self.west,
            Wind::North => &mut self.north,
        }
    }
}

// ── Player state ────────────────────────────────────────────────────

/// Tiles owned by one seat.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerState {
    /// Concealed tiles, in the order the authority dealt them.
    pub hand: Vec<TileId>,
    /// The tile drawn this turn and not yet merged into the hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_draw: Option<TileId>,
    /// Discarded tiles, oldest first.
    #[serde(default)]
    pub discards: Vec<TileId>,
}

impl PlayerState {
    /// Returns `true` if the tile is in the hand or the draw slot.
    pub fn holds(&self, tile: TileId) -> bool {
        self.current_draw == Some(tile) || self.hand.contains(&tile)
    }

    /// Number of tiles held (hand plus draw slot).
    pub fn held_count(&self) -> usize {
        self.hand.len() + usize::from(self.current_draw.is_some())
    }

    fn tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.hand
            .iter()
            .copied()
            .chain(self.current_draw)
            .chain(self.discards.iter().copied())
    }
}

// ── Match state ─────────────────────────────────────────────────────

/// Snapshot of one in-progress match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    /// Identity of the match.
    pub id: MatchId,
    /// Tiles owned by each seat.
    pub players: SeatMap<PlayerState>,
    /// The seat whose turn it is.
    pub current_turn: Wind,
    /// Bumped every time an action or event is applied.
    #[serde(default)]
    pub revision: u64,
}

impl MatchState {
    /// Create a state with empty hands where `current_turn` plays first.
    pub fn new(id: MatchId, current_turn: Wind) -> Self {
        Self {
            id,
            players: SeatMap::default(),
            current_turn,
            revision: 0,
        }
    }

    /// The tiles owned by `seat`.
    pub fn player(&self, seat: Wind) -> &PlayerState {
        &self.players[seat]
    }

    /// Returns `true` if it is `seat`'s turn.
    pub fn is_turn(&self, seat: Wind) -> bool {
        self.current_turn == seat
    }

    /// Check the structural invariants of the state.
    ///
    /// Every tile id must belong to the standard set and appear at most once
    /// across all hands, draw slots and discard piles.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] describing the first violation found.
    pub fn validate(&self) -> Result<(), StateError> {
        let mut seen = HashSet::new();
        for (seat, player) in self.players.iter() {
            for tile in player.tiles() {
                if !tile.is_valid() {
                    return Err(StateError::UnknownTile { seat, tile });
                }
                if !seen.insert(tile) {
                    return Err(StateError::DuplicateTile { tile });
                }
            }
        }
        Ok(())
    }
}

/// A violated [`MatchState`] invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A tile id outside the standard set.
    #[error("seat {seat} holds unknown tile {tile}")]
    UnknownTile { seat: Wind, tile: TileId },

    /// The same physical tile appears more than once.
    #[error("tile {tile} appears more than once")]
    DuplicateTile { tile: TileId },
}
