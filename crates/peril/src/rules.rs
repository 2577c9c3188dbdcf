//! The contract between the bus handlers and the game's rule engine.
//!
//! The rule engine owns the game state. Handlers only ask it what an event
//! means for the local player and act on the answer.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::events::{ArmyMove, GameLog, Player, PlayingState, RecognitionOfWar};

/// What an opponent's move means for the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveOutcome {
    /// The local player's own move, echoed back.
    SamePlayer,
    /// No contact with the local player's units.
    Safe,
    /// The move landed on the local player's units; war must be declared.
    MakeWar,
}

/// How a war resolved from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarOutcome {
    /// Neither side is the local player.
    NotInvolved,
    /// One side had nothing left to fight with.
    NoUnits,
    YouWon,
    OpponentWon,
    Draw,
}

/// The outcome of a war plus the usernames on each side.
///
/// For [`WarOutcome::Draw`] the two names are simply the two sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

impl WarResolution {
    /// A resolution with no named sides.
    pub fn bare(outcome: WarOutcome) -> Self {
        Self {
            outcome,
            winner: String::new(),
            loser: String::new(),
        }
    }

    /// The game log line for a fought war, or `None` if no war was fought.
    pub fn log_message(&self) -> Option<String> {
        match self.outcome {
            WarOutcome::YouWon | WarOutcome::OpponentWon => {
                Some(format!("{} won a war against {}", self.winner, self.loser))
            }
            WarOutcome::Draw => Some(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }
}

impl fmt::Display for WarOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInvolved => "not-involved",
            Self::NoUnits => "no-units",
            Self::YouWon => "you-won",
            Self::OpponentWon => "opponent-won",
            Self::Draw => "draw",
        };
        f.write_str(s)
    }
}

/// The game rule engine of one player.
///
/// Called from dispatcher tasks, so implementations guard their state
/// themselves (typically with a `Mutex`).
pub trait GameRules: Send + Sync + 'static {
    /// The local player's username.
    fn username(&self) -> String;

    /// A copy of the local player's current state.
    fn player_snapshot(&self) -> Player;

    /// Applies a pause or resume broadcast.
    fn handle_pause(&self, state: &PlayingState);

    /// Applies another player's move.
    fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome;

    /// Fights (or ignores) a declared war.
    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution;
}

/// Persists game log entries on the server.
pub trait GameLogWriter: Send + Sync + 'static {
    fn write_log(&self, log: &GameLog) -> io::Result<()>;
}

/// Appends one line per entry to a file.
#[derive(Debug)]
pub struct FileLogWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLogWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GameLogWriter for FileLogWriter {
    fn write_log(&self, log: &GameLog) -> io::Result<()> {
        let _guard = self.lock.lock().map_err(|_| io::Error::other("log writer poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{log}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_messages() {
        let won = WarResolution {
            outcome: WarOutcome::YouWon,
            winner: "alice".into(),
            loser: "bob".into(),
        };
        assert_eq!(won.log_message().as_deref(), Some("alice won a war against bob"));

        let draw = WarResolution {
            outcome: WarOutcome::Draw,
            ..won.clone()
        };
        assert_eq!(
            draw.log_message().as_deref(),
            Some("A war between alice and bob resulted in a draw")
        );
        assert_eq!(WarResolution::bare(WarOutcome::NoUnits).log_message(), None);
    }

    #[test]
    fn test_file_log_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileLogWriter::new(dir.path().join("game.log"));

        writer.write_log(&GameLog::now("alice", "first")).unwrap();
        writer.write_log(&GameLog::now("bob", "second")).unwrap();

        let text = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("alice: first"));
        assert!(lines[1].ends_with("bob: second"));
    }

    #[test]
    fn test_file_log_writer_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let writer = FileLogWriter::new(dir.path());
        assert!(writer.write_log(&GameLog::now("alice", "x")).is_err());
    }
}
