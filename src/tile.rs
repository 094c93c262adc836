//! Seats and tiles.
//!
//! A standard set holds 136 physical tiles: 34 distinct kinds with four copies
//! of each. Every physical tile is addressed by a [`TileId`] in `0..136`; the
//! kind is derived from the id (`id / 4` indexes [`Tile::ALL`]), so the set
//! never needs to travel over the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of physical tiles in a standard set.
pub const TILE_COUNT: u8 = 136;

/// Number of copies of each tile kind.
pub const COPIES_PER_KIND: u8 = 4;

// ── Seats ───────────────────────────────────────────────────────────

/// One of the four seats at the table.
///
/// Seating order (and therefore turn order) is East → South → West → North.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Wind {
    East,
    South,
    West,
    North,
}

impl Wind {
    /// All seats in seating order.
    pub const ALL: [Wind; 4] = [Wind::East, Wind::South, Wind::West, Wind::North];

    /// The seat that plays after this one.
    pub fn next(self) -> Wind {
        match self {
            Wind::East => Wind::South,
            Wind::South => Wind::West,
            Wind::West => Wind::North,
            Wind::North => Wind::East,
        }
    }

    /// Position of the seat in seating order (`0..4`).
    pub fn index(self) -> usize {
        match self {
            Wind::East => 0,
            Wind::South => 1,
            Wind::West => 2,
            Wind::North => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Wind::East => "east",
            Wind::South => "south",
            Wind::West => "west",
            Wind::North => "north",
        }
    }
}

impl fmt::Display for Wind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Tile kinds ──────────────────────────────────────────────────────

/// Suit of a numbered tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suit {
    Coins,
    Bamboo,
    Characters,
}

impl Suit {
    fn name(self) -> &'static str {
        match self {
            Suit::Coins => "coins",
            Suit::Bamboo => "bamboo",
            Suit::Characters => "characters",
        }
    }
}

/// Dragon honor tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dragon {
    Red,
    Green,
    White,
}

impl Dragon {
    fn name(self) -> &'static str {
        match self {
            Dragon::Red => "red",
            Dragon::Green => "green",
            Dragon::White => "white",
        }
    }
}

/// The kind of a tile. Several physical tiles share each kind.
///
/// Consumers are expected to `match` on this exhaustively; adding a kind must
/// break every dispatch site at compile time rather than fall through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tile {
    /// A numbered tile, `number` in `1..=9`.
    Simple { suit: Suit, number: u8 },
    /// A wind honor.
    Wind { wind: Wind },
    /// A dragon honor.
    Dragon { dragon: Dragon },
}

const fn simple(suit: Suit, number: u8) -> Tile {
    Tile::Simple { suit, number }
}

impl Tile {
    /// Every tile kind, in set order.
    pub const ALL: [Tile; 34] = [
        simple(Suit::Coins, 1),
        simple(Suit::Coins, 2),
        simple(Suit::Coins, 3),
        simple(Suit::Coins, 4),
        simple(Suit::Coins, 5),
        simple(Suit::Coins, 6),
        simple(Suit::Coins, 7),
        simple(Suit::Coins, 8),
        simple(Suit::Coins, 9),
        simple(Suit::Bamboo, 1),
        simple(Suit::Bamboo, 2),
        simple(Suit::Bamboo, 3),
        simple(Suit::Bamboo, 4),
        simple(Suit::Bamboo, 5),
        simple(Suit::Bamboo, 6),
        simple(Suit::Bamboo, 7),
        simple(Suit::Bamboo, 8),
        simple(Suit::Bamboo, 9),
        simple(Suit::Characters, 1),
        simple(Suit::Characters, 2),
        simple(Suit::Characters, 3),
        simple(Suit::Characters, 4),
        simple(Suit::Characters, 5),
        simple(Suit::Characters, 6),
        simple(Suit::Characters, 7),
        simple(Suit::Characters, 8),
        simple(Suit::Characters, 9),
        Tile::Wind { wind: Wind::East },
        Tile::Wind { wind: Wind::South },
        Tile::Wind { wind: Wind::West },
        Tile::Wind { wind: Wind::North },
        Tile::Dragon { dragon: Dragon::Red },
        Tile::Dragon { dragon: Dragon::Green },
        Tile::Dragon { dragon: Dragon::White },
    ];

    /// Returns `true` for wind and dragon tiles.
    pub fn is_honor(self) -> bool {
        match self {
            Tile::Simple { .. } => false,
            Tile::Wind { .. } | Tile::Dragon { .. } => true,
        }
    }

    /// Stable key the presentation layer uses to pick a tile face
    /// (e.g. `"bamboo_3"`, `"wind_east"`, `"dragon_red"`).
    pub fn asset_key(self) -> String {
        match self {
            Tile::Simple { suit, number } => format!("{}_{number}", suit.name()),
            Tile::Wind { wind } => format!("wind_{}", wind.name()),
            Tile::Dragon { dragon } => format!("dragon_{}", dragon.name()),
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.asset_key())
    }
}

// ── Tile ids ────────────────────────────────────────────────────────

/// Handle for one physical tile within a match.
///
/// Distinct from [`Tile`]: a set holds four tiles of every kind, and each of
/// them has its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub u8);

impl TileId {
    /// Returns `true` if the id addresses a tile of the standard set.
    pub fn is_valid(self) -> bool {
        self.0 < TILE_COUNT
    }

    /// The kind of this tile, or `None` for an id outside the standard set.
    pub fn tile(self) -> Option<Tile> {
        Tile::ALL.get(usize::from(self.0 / COPIES_PER_KIND)).copied()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
