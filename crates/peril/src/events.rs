//! Game events carried over the bus, and the player state they refer to.
//!
//! Moves, war declarations and pause broadcasts travel as JSON; game log
//! entries travel as bincode.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// A region of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Australia,
    Antarctica,
}

impl Location {
    pub const ALL: [Location; 6] = [
        Location::Americas,
        Location::Europe,
        Location::Africa,
        Location::Asia,
        Location::Australia,
        Location::Antarctica,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Americas => "americas",
            Self::Europe => "europe",
            Self::Africa => "africa",
            Self::Asia => "asia",
            Self::Australia => "australia",
            Self::Antarctica => "antarctica",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit type. Ranks differ in combat strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

impl UnitRank {
    /// Combat power of one unit of this rank.
    pub fn power(&self) -> u32 {
        match self {
            Self::Infantry => 1,
            Self::Cavalry => 5,
            Self::Artillery => 10,
        }
    }
}

/// One unit owned by a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    pub rank: UnitRank,
    pub location: Location,
}

/// A player and the units they own, keyed by unit id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub units: BTreeMap<u32, Unit>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }

    /// Units currently at `location`.
    pub fn units_at(&self, location: Location) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.location == location)
    }

    /// Sum of [`UnitRank::power`] over `units`.
    pub fn power_of<'a>(units: impl IntoIterator<Item = &'a Unit>) -> u32 {
        units.into_iter().map(|u| u.rank.power()).sum()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Broadcast by the server on [`PAUSE_KEY`](crate::routing::PAUSE_KEY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// A player moved some of their units to a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// A move brought two players' units into the same location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

/// One line of the server's game log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

impl GameLog {
    /// An entry stamped with the current time.
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}

impl fmt::Display for GameLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.current_time.to_rfc3339(),
            self.username,
            self.message
        )
    }
}
