use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peril::routing::{EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, PAUSE_KEY, army_moves_key};
use peril::{
    ArmyMove, FileLogWriter, GameRules, Location, MoveOutcome, Player, PlayingState,
    RecognitionOfWar, Unit, UnitRank, WarOutcome, WarResolution, declare_peril_topology,
    subscribe_player, subscribe_server,
};
use perilbus::prelude::*;
use perilbus_broker::Connection;

type DemoError = Box<dyn std::error::Error>;

// ---------------------------------------------------------------------------
// Game rules
// ---------------------------------------------------------------------------

/// A toy rule engine: wars are won by raw unit power at the contested
/// location, and the loser's units there are destroyed.
struct GameState {
    player: Mutex<Player>,
    paused: AtomicBool,
}

impl GameState {
    fn new(username: &str, units: &[(UnitRank, Location)]) -> Self {
        let mut player = Player::new(username);
        for (id, &(rank, location)) in (1..).zip(units) {
            player.units.insert(id, Unit { id, rank, location });
        }
        Self {
            player: Mutex::new(player),
            paused: AtomicBool::new(false),
        }
    }

    fn player(&self) -> MutexGuard<'_, Player> {
        self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves all units to `to` and returns the move to publish.
    fn move_all(&self, to: Location) -> ArmyMove {
        let mut player = self.player();
        for unit in player.units.values_mut() {
            unit.location = to;
        }
        ArmyMove {
            player: player.clone(),
            units: player.units.values().cloned().collect(),
            to_location: to,
        }
    }
}

impl GameRules for GameState {
    fn username(&self) -> String {
        self.player().username.clone()
    }

    fn player_snapshot(&self) -> Player {
        self.player().clone()
    }

    fn handle_pause(&self, state: &PlayingState) {
        self.paused.store(state.is_paused, Ordering::Release);
    }

    fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome {
        let player = self.player();
        if army_move.player.username == player.username {
            return MoveOutcome::SamePlayer;
        }
        if player.units_at(army_move.to_location).next().is_some() {
            MoveOutcome::MakeWar
        } else {
            MoveOutcome::Safe
        }
    }

    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution {
        let mut player = self.player();
        let me = player.username.clone();
        let attacking = war.attacker.username == me;
        if !attacking && war.defender.username != me {
            return WarResolution::bare(WarOutcome::NotInvolved);
        }

        let Some(location) = war.attacker.units.values().next().map(|u| u.location) else {
            return WarResolution::bare(WarOutcome::NoUnits);
        };
        let attack = Player::power_of(war.attacker.units_at(location));
        let defense = Player::power_of(war.defender.units_at(location));
        if attack == 0 || defense == 0 {
            return WarResolution::bare(WarOutcome::NoUnits);
        }

        let (attacker, defender) = (&war.attacker.username, &war.defender.username);
        let (winner, loser) = match attack.cmp(&defense) {
            std::cmp::Ordering::Greater => (attacker, defender),
            std::cmp::Ordering::Less => (defender, attacker),
            std::cmp::Ordering::Equal => {
                return WarResolution {
                    outcome: WarOutcome::Draw,
                    winner: attacker.clone(),
                    loser: defender.clone(),
                };
            }
        };

        let outcome = if *winner == me {
            WarOutcome::YouWon
        } else {
            player.units.retain(|_, u| u.location != location);
            WarOutcome::OpponentWon
        };
        WarResolution {
            outcome,
            winner: winner.clone(),
            loser: loser.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

/// Runs one server and two players over the configured broker until the
/// war bob starts shows up in the game log. Returns the log lines.
async fn run_demo(config: &BusConfig, log_path: &Path) -> Result<Vec<String>, DemoError> {
    let server = perilbus::connect(config).await?;
    let server_topology = Topology::new(&server);
    declare_peril_topology(&server_topology).await?;
    let log_sub = subscribe_server(
        &server_topology,
        Arc::new(FileLogWriter::new(log_path)),
        config,
    )
    .await?;

    let alice = Arc::new(GameState::new(
        "alice",
        &[(UnitRank::Artillery, Location::Europe)],
    ));
    let bob = Arc::new(GameState::new(
        "bob",
        &[(UnitRank::Infantry, Location::Asia)],
    ));

    let alice_conn = perilbus::connect(config).await?;
    let bob_conn = perilbus::connect(config).await?;
    let alice_subs =
        subscribe_player(&Topology::new(&alice_conn), Arc::clone(&alice), config).await?;
    let bob_subs = subscribe_player(&Topology::new(&bob_conn), Arc::clone(&bob), config).await?;

    let announcer = Publisher::open(&server, Format::Json).await?;
    announcer
        .publish(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused: true })
        .await?;
    announcer
        .publish(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused: false })
        .await?;

    let bob_publisher = Publisher::open(&bob_conn, Format::Json).await?;
    let army_move = bob.move_all(Location::Europe);
    tracing::info!(player = "bob", to = %army_move.to_location, "moving");
    bob_publisher
        .publish(EXCHANGE_PERIL_TOPIC, &army_moves_key("bob"), &army_move)
        .await?;

    let lines = wait_for_log(log_path, Duration::from_secs(5)).await?;
    for line in &lines {
        tracing::info!(%line, "game log");
    }

    for conn in [&alice_conn, &bob_conn, &server] {
        conn.close().await?;
    }
    for sub in alice_subs.all().into_iter().chain(bob_subs.all()).chain([log_sub]) {
        let queue = sub.queue().to_string();
        let stats = sub.finished().await?;
        tracing::info!(%queue, received = stats.received, acked = stats.acked, "final stats");
    }
    Ok(lines)
}

/// Polls the log file until it has at least one line.
async fn wait_for_log(path: &Path, limit: Duration) -> Result<Vec<String>, DemoError> {
    let read = async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if !text.is_empty() {
                    return text.lines().map(str::to_owned).collect::<Vec<_>>();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    Ok(tokio::time::timeout(limit, read).await?)
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    perilbus::telemetry::init("info");

    let config = BusConfig::load()?;
    let log_path = std::env::temp_dir().join("peril-game.log");
    let _ = std::fs::remove_file(&log_path);

    tracing::info!(url = %config.url, log = %log_path.display(), "starting peril demo");
    run_demo(&config, &log_path).await?;
    Ok(())
}
