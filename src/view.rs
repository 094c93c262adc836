//! Snapshots handed to the presentation layer.
//!
//! The view layer never sees [`MatchState`] itself; it receives a
//! [`MatchView`] every time the state changes and owns any caching of tile
//! visuals on its side.

use crate::state::{MatchId, MatchState, PlayerState};
use crate::tile::{Tile, TileId, Wind};

/// One tile as the view layer draws it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileView {
    pub id: TileId,
    pub tile: Tile,
    /// Key of the face to draw, see [`Tile::asset_key`].
    pub asset_key: String,
}

impl TileView {
    fn new(id: TileId) -> Option<Self> {
        let tile = id.tile()?;
        Some(Self {
            id,
            tile,
            asset_key: tile.asset_key(),
        })
    }
}

/// The tiles of one seat, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatView {
    pub seat: Wind,
    /// Hand sorted by tile kind, then id.
    pub hand: Vec<TileView>,
    pub draw: Option<TileView>,
    /// Discards in the order they were made.
    pub discards: Vec<TileView>,
}

impl SeatView {
    fn new(seat: Wind, player: &PlayerState) -> Self {
        let mut hand: Vec<TileView> = player
            .hand
            .iter()
            .filter_map(|id| TileView::new(*id))
            .collect();
        hand.sort_by(|a, b| a.tile.cmp(&b.tile).then(a.id.cmp(&b.id)));
        Self {
            seat,
            hand,
            draw: player.current_draw.and_then(TileView::new),
            discards: player
                .discards
                .iter()
                .filter_map(|id| TileView::new(*id))
                .collect(),
        }
    }
}

/// Everything the view layer needs to draw the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchView {
    pub match_id: MatchId,
    pub current_turn: Wind,
    pub revision: u64,
    /// Seats in seating order, East first.
    pub seats: [SeatView; 4],
}

impl MatchView {
    /// The view of one seat.
    pub fn seat(&self, seat: Wind) -> Option<&SeatView> {
        self.seats.get(seat.index())
    }
}

impl From<&MatchState> for MatchView {
    fn from(state: &MatchState) -> Self {
        Self {
            match_id: state.id,
            current_turn: state.current_turn,
            revision: state.revision,
            seats: Wind::ALL.map(|seat| SeatView::new(seat, state.player(seat))),
        }
    }
}
