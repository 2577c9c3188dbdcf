//! Exchange names, queue names and routing keys shared by the Peril server
//! and clients.

/// Direct exchange carrying pause/resume broadcasts.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange carrying moves, war declarations and game logs.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Fanout exchange receiving every rejected message.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";
/// Durable queue bound to [`EXCHANGE_PERIL_DLX`].
pub const PERIL_DLQ: &str = "peril_dlq";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const PAUSE_KEY: &str = "pause";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `army_moves.<username>`
pub fn army_moves_key(username: &str) -> String {
    format!("{ARMY_MOVES_PREFIX}.{username}")
}

/// `war.<username>`
pub fn war_key(username: &str) -> String {
    format!("{WAR_RECOGNITIONS_PREFIX}.{username}")
}

/// `pause.<username>`, the name of a player's pause queue.
pub fn pause_queue(username: &str) -> String {
    format!("{PAUSE_KEY}.{username}")
}

/// `game_logs.<username>`
pub fn game_log_key(username: &str) -> String {
    format!("{GAME_LOG_SLUG}.{username}")
}

/// `<prefix>.*`: every key one level below `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}
