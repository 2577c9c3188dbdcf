//! Integration tests for the Peril handlers, wired through an in-process
//! broker exactly as the server and clients wire them.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peril::handlers::{handler_move, handler_war};
use peril::routing::{
    EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY, PERIL_DLQ,
    WAR_RECOGNITIONS_PREFIX, army_moves_key, game_log_key, war_key,
};
use peril::setup::{army_moves_binding, game_logs_binding, war_binding};
use peril::{
    ArmyMove, GameLog, GameLogWriter, GameRules, Location, MoveOutcome, Player, PlayingState,
    RecognitionOfWar, Unit, UnitRank, WarOutcome, WarResolution, declare_peril_topology,
    subscribe_player, subscribe_server,
};
use perilbus::prelude::*;
use perilbus_broker::{
    BrokerError, Channel, ChannelId, ConnectionId, ConsumeOptions, Consumer, Connection,
    DeliveryTag, ExchangeSpec, MemoryBroker, MemoryChannel, MemoryConnection, OutboundMessage,
    QueueInfo, QueueSpec,
};
use perilbus_codec::{BincodeCodec, CONTENT_TYPE_BINCODE, Codec, JsonCodec};

const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Test doubles
// =========================================================================

/// Rules that answer from a script and record what they were asked.
struct Scripted {
    player: Player,
    move_outcome: MoveOutcome,
    war_outcomes: Mutex<VecDeque<WarOutcome>>,
    pauses: Mutex<Vec<bool>>,
    moves_seen: AtomicUsize,
    wars_seen: AtomicUsize,
}

impl Scripted {
    fn new(username: &str, move_outcome: MoveOutcome, wars: &[WarOutcome]) -> Arc<Self> {
        let mut player = Player::new(username);
        player.units.insert(
            1,
            Unit {
                id: 1,
                rank: UnitRank::Artillery,
                location: Location::Europe,
            },
        );
        Arc::new(Self {
            player,
            move_outcome,
            war_outcomes: Mutex::new(wars.iter().copied().collect()),
            pauses: Mutex::new(Vec::new()),
            moves_seen: AtomicUsize::new(0),
            wars_seen: AtomicUsize::new(0),
        })
    }
}

impl GameRules for Scripted {
    fn username(&self) -> String {
        self.player.username.clone()
    }

    fn player_snapshot(&self) -> Player {
        self.player.clone()
    }

    fn handle_pause(&self, state: &PlayingState) {
        self.pauses.lock().unwrap().push(state.is_paused);
    }

    fn handle_move(&self, _army_move: &ArmyMove) -> MoveOutcome {
        self.moves_seen.fetch_add(1, Ordering::SeqCst);
        self.move_outcome
    }

    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution {
        self.wars_seen.fetch_add(1, Ordering::SeqCst);
        let mut script = self.war_outcomes.lock().unwrap();
        let outcome = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().copied().unwrap_or(WarOutcome::NotInvolved)
        };
        let (me, them) = (self.player.username.clone(), war.attacker.username.clone());
        match outcome {
            WarOutcome::YouWon | WarOutcome::Draw => WarResolution {
                outcome,
                winner: me,
                loser: them,
            },
            WarOutcome::OpponentWon => WarResolution {
                outcome,
                winner: them,
                loser: me,
            },
            _ => WarResolution::bare(outcome),
        }
    }
}

/// Collects log entries; fails the first `failures` writes.
#[derive(Default)]
struct MemoryLog {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    entries: Mutex<Vec<GameLog>>,
}

impl GameLogWriter for MemoryLog {
    fn write_log(&self, log: &GameLog) -> io::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(io::Error::other("disk full"));
        }
        self.entries.lock().unwrap().push(log.clone());
        Ok(())
    }
}

/// Wraps a [`MemoryConnection`]; its channels fail the first `fail_next`
/// publishes with a closed-channel error.
struct FlakyConnection {
    inner: MemoryConnection,
    fail_next: Arc<AtomicUsize>,
}

impl FlakyConnection {
    async fn open(broker: &MemoryBroker) -> Self {
        Self {
            inner: broker.connect().await.unwrap(),
            fail_next: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FlakyChannel {
    inner: MemoryChannel,
    fail_next: Arc<AtomicUsize>,
}

impl Connection for FlakyConnection {
    type Channel = FlakyChannel;

    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    async fn open_channel(&self) -> Result<FlakyChannel, BrokerError> {
        Ok(FlakyChannel {
            inner: self.inner.open_channel().await?,
            fail_next: Arc::clone(&self.fail_next),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

impl Channel for FlakyChannel {
    fn id(&self) -> ChannelId {
        self.inner.id()
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        self.inner.declare_exchange(spec).await
    }

    async fn declare_exchange_passive(&self, name: &str) -> Result<(), BrokerError> {
        self.inner.declare_exchange_passive(name).await
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BrokerError> {
        self.inner.declare_queue(spec).await
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, key: &str) -> Result<(), BrokerError> {
        self.inner.bind_queue(queue, exchange, key).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::ChannelClosed(self.inner.id().to_string()));
        }
        self.inner.publish(exchange, routing_key, message).await
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError> {
        self.inner.consume(queue, options).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.inner.ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.inner.nack(tag, requeue).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

// =========================================================================
// Helpers
// =========================================================================

async fn setup(broker: &MemoryBroker) -> MemoryConnection {
    let conn = broker.connect().await.unwrap();
    declare_peril_topology(&Topology::new(&conn)).await.unwrap();
    conn
}

/// Declares `binding` and consumes it directly, bypassing the dispatcher.
async fn observe(conn: &MemoryConnection, binding: QueueBinding) -> (MemoryChannel, Consumer) {
    let topology = Topology::new(conn);
    let (ch, info) = topology.declare_and_bind(&binding).await.unwrap();
    let consumer = ch.consume(&info.name, ConsumeOptions::default()).await.unwrap();
    (ch, consumer)
}

async fn next(consumer: &mut Consumer) -> perilbus_broker::Delivery {
    tokio::time::timeout(WAIT, consumer.next())
        .await
        .expect("delivery in time")
        .expect("stream open")
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_for_depth(broker: &MemoryBroker, queue: &str, depth: usize) {
    tokio::time::timeout(WAIT, async {
        while broker.queue_depth(queue).await.unwrap() != depth {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("queue '{queue}' never reached depth {depth}"));
}

/// Waits until `queue` holds nothing ready and nothing unacknowledged.
async fn wait_until_settled(broker: &MemoryBroker, queue: &str) {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(info) = broker.queue_info(queue).await.unwrap() {
                if info.ready == 0 && info.unacked == 0 {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("queue '{queue}' never settled"));
}

fn army_move(username: &str) -> ArmyMove {
    ArmyMove {
        player: Player::new(username),
        units: vec![Unit {
            id: 7,
            rank: UnitRank::Cavalry,
            location: Location::Europe,
        }],
        to_location: Location::Europe,
    }
}

fn war_by(attacker: &str, defender: &str) -> RecognitionOfWar {
    RecognitionOfWar {
        attacker: Player::new(attacker),
        defender: Player::new(defender),
    }
}

// =========================================================================
// Moves
// =========================================================================

#[tokio::test]
async fn test_move_onto_units_declares_war() {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let (_ch, mut wars) = observe(&conn, war_binding()).await;

    let alice = Scripted::new("alice", MoveOutcome::MakeWar, &[]);
    let topology = Topology::new(&conn);
    let _sub = subscribe(
        &topology,
        SubscriptionSpec::new(army_moves_binding("alice")),
        handler_move(Arc::clone(&alice)),
    )
    .await
    .unwrap();

    let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &army_moves_key("bob"), &army_move("bob"))
        .await
        .unwrap();

    let delivery = next(&mut wars).await;
    assert_eq!(delivery.routing_key, war_key("alice"));
    let war: RecognitionOfWar = JsonCodec.decode(&delivery.payload).unwrap();
    assert_eq!(war.attacker.username, "bob");
    assert_eq!(war.defender, alice.player_snapshot());

    wait_for_depth(&broker, "army_moves.alice", 0).await;
    assert_eq!(alice.moves_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_safe_move_is_acked_without_publishing() {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let (_ch, mut wars) = observe(&conn, war_binding()).await;

    let alice = Scripted::new("alice", MoveOutcome::Safe, &[]);
    let topology = Topology::new(&conn);
    let _sub = subscribe(
        &topology,
        SubscriptionSpec::new(army_moves_binding("alice")),
        handler_move(Arc::clone(&alice)),
    )
    .await
    .unwrap();

    let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &army_moves_key("bob"), &army_move("bob"))
        .await
        .unwrap();

    eventually("move handled", || alice.moves_seen.load(Ordering::SeqCst) == 1).await;
    wait_for_depth(&broker, "army_moves.alice", 0).await;
    assert!(wars.try_next().is_none());
}

#[tokio::test]
async fn test_failed_war_declaration_requeues_the_move() {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let (_ch, mut wars) = observe(&conn, war_binding()).await;

    let alice = Scripted::new("alice", MoveOutcome::MakeWar, &[]);
    let flaky = FlakyConnection::open(&broker).await;
    let sub = subscribe(
        &Topology::new(&flaky),
        SubscriptionSpec::new(army_moves_binding("alice")),
        handler_move(Arc::clone(&alice)),
    )
    .await
    .unwrap();

    flaky.fail_next.store(1, Ordering::SeqCst);
    let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &army_moves_key("bob"), &army_move("bob"))
        .await
        .unwrap();

    let delivery = next(&mut wars).await;
    assert_eq!(delivery.routing_key, war_key("alice"));
    eventually("move retried", || alice.moves_seen.load(Ordering::SeqCst) == 2).await;
    wait_until_settled(&broker, "army_moves.alice").await;
    assert!(wars.try_next().is_none());

    flaky.close().await.unwrap();
    let stats = sub.finished().await.unwrap();
    assert_eq!((stats.received, stats.requeued, stats.acked), (2, 1, 1));
}

// =========================================================================
// Wars
// =========================================================================

/// One player fighting one war declared by bob, with an observer on the
/// game log queue.
struct WarRun {
    broker: MemoryBroker,
    alice: Arc<Scripted>,
    logs: Consumer,
    _conn: MemoryConnection,
    _observer: MemoryChannel,
}

async fn run_war(outcomes: &[WarOutcome]) -> WarRun {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let (observer, logs) = observe(&conn, game_logs_binding()).await;

    let alice = Scripted::new("alice", MoveOutcome::Safe, outcomes);
    let topology = Topology::new(&conn);
    let _sub = subscribe(
        &topology,
        SubscriptionSpec::new(war_binding()),
        handler_war(Arc::clone(&alice)),
    )
    .await
    .unwrap();

    let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &war_key("bob"), &war_by("bob", "alice"))
        .await
        .unwrap();
    WarRun {
        broker,
        alice,
        logs,
        _conn: conn,
        _observer: observer,
    }
}

#[tokio::test]
async fn test_won_war_is_logged_under_attacker() {
    let mut run = run_war(&[WarOutcome::YouWon]).await;

    let delivery = next(&mut run.logs).await;
    assert_eq!(delivery.routing_key, game_log_key("bob"));
    assert_eq!(delivery.content_type.as_deref(), Some(CONTENT_TYPE_BINCODE));
    let log: GameLog = BincodeCodec.decode(&delivery.payload).unwrap();
    assert_eq!(log.username, "alice");
    assert_eq!(log.message, "alice won a war against bob");

    wait_for_depth(&run.broker, WAR_RECOGNITIONS_PREFIX, 0).await;
    assert_eq!(run.alice.wars_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_draw_is_logged() {
    let mut run = run_war(&[WarOutcome::Draw]).await;

    let log: GameLog = BincodeCodec.decode(&next(&mut run.logs).await.payload).unwrap();
    assert_eq!(log.message, "A war between alice and bob resulted in a draw");
}

#[tokio::test]
async fn test_war_with_no_units_is_dead_lettered() {
    let mut run = run_war(&[WarOutcome::NoUnits]).await;

    wait_for_depth(&run.broker, PERIL_DLQ, 1).await;
    assert_eq!(run.broker.queue_depth(WAR_RECOGNITIONS_PREFIX).await.unwrap(), 0);
    assert_eq!(run.alice.wars_seen.load(Ordering::SeqCst), 1);
    assert!(run.logs.try_next().is_none());
}

#[tokio::test]
async fn test_failed_game_log_publish_requeues_the_war() {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let (_ch, mut logs) = observe(&conn, game_logs_binding()).await;

    let alice = Scripted::new("alice", MoveOutcome::Safe, &[WarOutcome::YouWon]);
    let flaky = FlakyConnection::open(&broker).await;
    let sub = subscribe(
        &Topology::new(&flaky),
        SubscriptionSpec::new(war_binding()),
        handler_war(Arc::clone(&alice)),
    )
    .await
    .unwrap();

    flaky.fail_next.store(1, Ordering::SeqCst);
    let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &war_key("bob"), &war_by("bob", "alice"))
        .await
        .unwrap();

    let delivery = next(&mut logs).await;
    assert_eq!(delivery.routing_key, game_log_key("bob"));
    let log: GameLog = BincodeCodec.decode(&delivery.payload).unwrap();
    assert_eq!(log.message, "alice won a war against bob");
    wait_until_settled(&broker, WAR_RECOGNITIONS_PREFIX).await;
    assert_eq!(alice.wars_seen.load(Ordering::SeqCst), 2);
    assert!(logs.try_next().is_none());

    flaky.close().await.unwrap();
    let stats = sub.finished().await.unwrap();
    assert_eq!((stats.received, stats.requeued, stats.acked), (2, 1, 1));
    assert_eq!(broker.queue_depth(PERIL_DLQ).await.unwrap(), 0);
}

#[tokio::test]
async fn test_uninvolved_war_is_requeued_until_someone_fights_it() {
    let mut run = run_war(&[WarOutcome::NotInvolved, WarOutcome::OpponentWon]).await;

    let log: GameLog = BincodeCodec.decode(&next(&mut run.logs).await.payload).unwrap();
    assert_eq!(log.message, "bob won a war against alice");
    assert_eq!(run.alice.wars_seen.load(Ordering::SeqCst), 2);
}

// =========================================================================
// Server log and pause
// =========================================================================

#[tokio::test]
async fn test_failed_log_write_is_retried() {
    let broker = MemoryBroker::start("peril");
    let conn = setup(&broker).await;
    let writer = Arc::new(MemoryLog {
        failures: AtomicUsize::new(1),
        ..Default::default()
    });
    let _sub = subscribe_server(&Topology::new(&conn), Arc::clone(&writer), &BusConfig::default())
        .await
        .unwrap();

    let publisher = Publisher::open(&conn, Format::Bincode).await.unwrap();
    let entry = GameLog::now("alice", "alice won a war against bob");
    publisher
        .publish(EXCHANGE_PERIL_TOPIC, &game_log_key("bob"), &entry)
        .await
        .unwrap();

    eventually("log written", || writer.entries.lock().unwrap().len() == 1).await;
    assert_eq!(writer.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(writer.entries.lock().unwrap()[0], entry);
    wait_for_depth(&broker, GAME_LOG_SLUG, 0).await;
}

#[tokio::test]
async fn test_pause_reaches_every_player() {
    let broker = MemoryBroker::start("peril");
    let server = setup(&broker).await;
    let config = BusConfig::default();

    let alice = Scripted::new("alice", MoveOutcome::Safe, &[]);
    let bob = Scripted::new("bob", MoveOutcome::Safe, &[]);
    let alice_conn = broker.connect().await.unwrap();
    let bob_conn = broker.connect().await.unwrap();
    let _a = subscribe_player(&Topology::new(&alice_conn), Arc::clone(&alice), &config)
        .await
        .unwrap();
    let _b = subscribe_player(&Topology::new(&bob_conn), Arc::clone(&bob), &config)
        .await
        .unwrap();

    let publisher = Publisher::open(&server, Format::Json).await.unwrap();
    publisher
        .publish(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused: true })
        .await
        .unwrap();
    publisher
        .publish(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused: false })
        .await
        .unwrap();

    for player in [&alice, &bob] {
        eventually("pauses applied", || player.pauses.lock().unwrap().len() == 2).await;
        assert_eq!(*player.pauses.lock().unwrap(), vec![true, false]);
    }

    // A player's transient queues leave with the player.
    alice_conn.close().await.unwrap();
    assert_eq!(broker.queue_info("pause.alice").await.unwrap(), None);
    assert!(broker.queue_info("pause.bob").await.unwrap().is_some());
}

// =========================================================================
// End to end
// =========================================================================

#[tokio::test]
async fn test_move_war_and_log_end_to_end() {
    let broker = MemoryBroker::start("peril");
    let server = setup(&broker).await;
    let config = BusConfig::default();

    let writer = Arc::new(MemoryLog::default());
    let _log = subscribe_server(&Topology::new(&server), Arc::clone(&writer), &config)
        .await
        .unwrap();

    let alice = Scripted::new("alice", MoveOutcome::MakeWar, &[WarOutcome::YouWon]);
    let alice_conn = broker.connect().await.unwrap();
    let subs = subscribe_player(&Topology::new(&alice_conn), Arc::clone(&alice), &config)
        .await
        .unwrap();

    let bob_conn = broker.connect().await.unwrap();
    let bob = Publisher::open(&bob_conn, Format::Json).await.unwrap();
    bob.publish(EXCHANGE_PERIL_TOPIC, &army_moves_key("bob"), &army_move("bob"))
        .await
        .unwrap();

    eventually("war logged", || writer.entries.lock().unwrap().len() == 1).await;
    let entry = writer.entries.lock().unwrap()[0].clone();
    assert_eq!(entry.username, "alice");
    assert_eq!(entry.message, "alice won a war against bob");
    assert_eq!(broker.queue_depth(PERIL_DLQ).await.unwrap(), 0);

    alice_conn.close().await.unwrap();
    for sub in subs.all() {
        let stats = sub.finished().await.unwrap();
        assert_eq!(stats.discarded, 0);
    }
}
