//! The standard Peril topology and the subscriptions each participant
//! registers on it.

use std::sync::Arc;

use perilbus::{
    BusConfig, BusError, DeadLetterConfig, Durability, QueueBinding, Subscription,
    SubscriptionSpec, Topology, subscribe,
};
use perilbus_broker::{Channel, Connection, ExchangeKind};
use perilbus_codec::Format;

use crate::handlers::{handler_log, handler_move, handler_pause, handler_war};
use crate::routing::{
    ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC,
    GAME_LOG_SLUG, PAUSE_KEY, PERIL_DLQ, WAR_RECOGNITIONS_PREFIX, army_moves_key, pause_queue,
    wildcard,
};
use crate::rules::{GameLogWriter, GameRules};

/// Declares the three durable exchanges and the dead-letter queue.
///
/// Safe to call from every participant; redeclaring is a no-op.
pub async fn declare_peril_topology<C: Connection>(
    topology: &Topology<'_, C>,
) -> Result<(), BusError> {
    topology
        .declare_exchange(EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct, true)
        .await?;
    topology
        .declare_exchange(EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic, true)
        .await?;
    topology
        .declare_exchange(EXCHANGE_PERIL_DLX, ExchangeKind::Fanout, true)
        .await?;

    let (channel, _) = topology
        .declare_and_bind(&QueueBinding::new(
            EXCHANGE_PERIL_DLX,
            PERIL_DLQ,
            "",
            Durability::Durable,
        ))
        .await?;
    channel.close().await?;

    tracing::info!("peril topology declared");
    Ok(())
}

fn dead_lettered(binding: QueueBinding) -> QueueBinding {
    binding.dead_letter(DeadLetterConfig::new(EXCHANGE_PERIL_DLX))
}

/// `army_moves.<username>`: every player's moves, private to one player.
pub fn army_moves_binding(username: &str) -> QueueBinding {
    dead_lettered(QueueBinding::new(
        EXCHANGE_PERIL_TOPIC,
        army_moves_key(username),
        wildcard(ARMY_MOVES_PREFIX),
        Durability::Transient,
    ))
}

/// `pause.<username>`: pause broadcasts, private to one player.
pub fn pause_binding(username: &str) -> QueueBinding {
    dead_lettered(QueueBinding::new(
        EXCHANGE_PERIL_DIRECT,
        pause_queue(username),
        PAUSE_KEY,
        Durability::Transient,
    ))
}

/// `war`: war declarations, shared by all players.
pub fn war_binding() -> QueueBinding {
    dead_lettered(QueueBinding::new(
        EXCHANGE_PERIL_TOPIC,
        WAR_RECOGNITIONS_PREFIX,
        wildcard(WAR_RECOGNITIONS_PREFIX),
        Durability::Durable,
    ))
}

/// `game_logs`: game log entries, consumed by the server.
pub fn game_logs_binding() -> QueueBinding {
    dead_lettered(QueueBinding::new(
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        wildcard(GAME_LOG_SLUG),
        Durability::Durable,
    ))
}

/// A player's three subscriptions.
#[derive(Debug)]
pub struct PlayerSubscriptions {
    pub moves: Subscription,
    pub pause: Subscription,
    pub war: Subscription,
}

impl PlayerSubscriptions {
    pub fn all(self) -> [Subscription; 3] {
        [self.moves, self.pause, self.war]
    }
}

/// Subscribes a player to moves, pause broadcasts and war declarations.
///
/// Prefetch comes from `config`; payload formats are fixed by the game.
pub async fn subscribe_player<C, R>(
    topology: &Topology<'_, C>,
    rules: Arc<R>,
    config: &BusConfig,
) -> Result<PlayerSubscriptions, BusError>
where
    C: Connection,
    R: GameRules,
{
    let username = rules.username();
    let json = |binding: QueueBinding| {
        SubscriptionSpec::from_config(binding, config)
            .format(Format::Json)
            .publish_format(Format::Json)
    };

    let moves = subscribe(
        topology,
        json(army_moves_binding(&username)),
        handler_move(Arc::clone(&rules)),
    )
    .await?;
    let pause = subscribe(
        topology,
        json(pause_binding(&username)),
        handler_pause(Arc::clone(&rules)),
    )
    .await?;
    let war = subscribe(topology, json(war_binding()), handler_war(rules)).await?;

    Ok(PlayerSubscriptions { moves, pause, war })
}

/// Subscribes the server's game log writer.
pub async fn subscribe_server<C, W>(
    topology: &Topology<'_, C>,
    writer: Arc<W>,
    config: &BusConfig,
) -> Result<Subscription, BusError>
where
    C: Connection,
    W: GameLogWriter,
{
    let spec = SubscriptionSpec::from_config(game_logs_binding(), config).format(Format::Bincode);
    subscribe(topology, spec, handler_log::<W, C::Channel>(writer)).await
}
