//! # peril
//!
//! The Peril game's side of the bus: routing names, event types, the
//! rule-engine contract and the handlers that react to events.
//!
//! ```text
//!  player ──army_moves.<user>──▶ peril_topic ──▶ army_moves.<user> queues ──▶ handler_move
//!                                     │                                          │ MakeWar
//!                                     ◀──────────────── war.<user> ◀─────────────┘
//!                                     │
//!                                     ├──▶ war (shared) ──▶ handler_war ──game_logs.<attacker>──┐
//!                                     ◀─────────────────────────────────────────────────────────┘
//!                                     └──▶ game_logs ──▶ handler_log (server)
//!
//!  server ──pause──▶ peril_direct ──▶ pause.<user> queues ──▶ handler_pause
//! ```
//!
//! Everything a handler rejects lands in `peril_dlq` through the `peril_dlx`
//! fanout exchange.

pub mod events;
pub mod handlers;
pub mod routing;
pub mod rules;
pub mod setup;

pub use events::{
    ArmyMove, GameLog, Location, Player, PlayingState, RecognitionOfWar, Unit, UnitRank,
};
pub use rules::{
    FileLogWriter, GameLogWriter, GameRules, MoveOutcome, WarOutcome, WarResolution,
};
pub use setup::{
    PlayerSubscriptions, declare_peril_topology, subscribe_player, subscribe_server,
};
