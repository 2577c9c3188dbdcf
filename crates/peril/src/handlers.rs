//! Bus handlers for the Peril client and server.
//!
//! Each constructor closes over the game's rule engine (or log writer) and
//! returns a [`Handler`] ready for [`subscribe`](perilbus::subscribe).
//! Handlers that react with a follow-up publish requeue the inbound event
//! when that publish fails, so the whole reaction is retried.

use std::sync::Arc;

use perilbus::{Handler, Publisher, Verdict};
use perilbus_broker::Channel;

use crate::events::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use crate::routing::{EXCHANGE_PERIL_TOPIC, game_log_key, war_key};
use crate::rules::{GameLogWriter, GameRules, MoveOutcome, WarOutcome};

/// Applies pause/resume broadcasts. Always acks.
pub fn handler_pause<R, Ch>(rules: Arc<R>) -> Handler<PlayingState, Ch>
where
    R: GameRules,
    Ch: Channel,
{
    Handler::pure(move |state: PlayingState| {
        rules.handle_pause(&state);
        tracing::info!(player = %rules.username(), paused = state.is_paused, "pause state applied");
        Verdict::Ack
    })
}

/// Applies another player's move; declares war under `war.<username>` when
/// the move lands on the local player's units.
pub fn handler_move<R, Ch>(rules: Arc<R>) -> Handler<ArmyMove, Ch>
where
    R: GameRules,
    Ch: Channel,
{
    Handler::with_publisher(move |army_move: ArmyMove, publisher: Publisher<Ch>| {
        let rules = Arc::clone(&rules);
        async move {
            let outcome = rules.handle_move(&army_move);
            if outcome != MoveOutcome::MakeWar {
                tracing::debug!(mover = %army_move.player.username, ?outcome, "move handled");
                return Verdict::Ack;
            }

            let username = rules.username();
            let war = RecognitionOfWar {
                attacker: army_move.player,
                defender: rules.player_snapshot(),
            };
            tracing::info!(
                attacker = %war.attacker.username,
                defender = %war.defender.username,
                "declaring war"
            );
            match publisher
                .publish_json(EXCHANGE_PERIL_TOPIC, &war_key(&username), &war)
                .await
            {
                Ok(()) => Verdict::Ack,
                Err(_) => Verdict::NackRequeue,
            }
        }
    })
}

/// Fights a declared war and records the result in the game log under
/// `game_logs.<attacker>`.
///
/// A war the local player is not part of goes back to the shared queue
/// for another player; a war with nobody left to fight is discarded.
pub fn handler_war<R, Ch>(rules: Arc<R>) -> Handler<RecognitionOfWar, Ch>
where
    R: GameRules,
    Ch: Channel,
{
    Handler::with_publisher(move |war: RecognitionOfWar, publisher: Publisher<Ch>| {
        let rules = Arc::clone(&rules);
        async move {
            let resolution = rules.handle_war(&war);
            tracing::debug!(
                player = %rules.username(),
                attacker = %war.attacker.username,
                outcome = %resolution.outcome,
                "war handled"
            );

            let message = match resolution.outcome {
                WarOutcome::NotInvolved => return Verdict::NackRequeue,
                WarOutcome::NoUnits => return Verdict::NackDiscard,
                WarOutcome::YouWon | WarOutcome::OpponentWon | WarOutcome::Draw => {
                    match resolution.log_message() {
                        Some(message) => message,
                        None => return Verdict::NackRequeue,
                    }
                }
            };

            let log = GameLog::now(rules.username(), message);
            match publisher
                .publish_bincode(
                    EXCHANGE_PERIL_TOPIC,
                    &game_log_key(&war.attacker.username),
                    &log,
                )
                .await
            {
                Ok(()) => Verdict::Ack,
                Err(_) => Verdict::NackRequeue,
            }
        }
    })
}

/// Server side: persists game log entries. A failed write is retried.
pub fn handler_log<W, Ch>(writer: Arc<W>) -> Handler<GameLog, Ch>
where
    W: GameLogWriter,
    Ch: Channel,
{
    Handler::pure(move |log: GameLog| match writer.write_log(&log) {
        Ok(()) => Verdict::Ack,
        Err(e) => {
            tracing::warn!(username = %log.username, error = %e, "failed to write game log");
            Verdict::NackRequeue
        }
    })
}
