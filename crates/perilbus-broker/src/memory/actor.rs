//! The broker actor: one Tokio task that owns every exchange, queue,
//! connection and channel.
//!
//! Handles talk to it through a bounded mpsc channel. Commands that need an
//! answer carry a `oneshot::Sender` reply channel; the actor processes
//! commands strictly one at a time, so broker state never needs a lock.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use crate::routing::binding_matches;
use crate::{
    BrokerError, ChannelId, ConnectionId, ConsumeOptions, Consumer, ConsumerTag,
    DEFAULT_EXCHANGE, Delivery, DeliveryTag, ExchangeSpec, FieldTable,
    OutboundMessage, QueueInfo, QueueSpec, X_FIRST_DEATH_EXCHANGE, X_FIRST_DEATH_QUEUE,
    X_FIRST_DEATH_REASON,
};

/// Reply channel for a fallible command.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, BrokerError>>;

/// Commands sent to the broker actor.
pub(crate) enum BrokerCommand {
    Connect {
        reply: oneshot::Sender<ConnectionId>,
    },
    CloseConnection {
        conn: ConnectionId,
        reply: Option<Reply<()>>,
    },
    OpenChannel {
        conn: ConnectionId,
        reply: Reply<ChannelId>,
    },
    CloseChannel {
        channel: ChannelId,
        reply: Option<Reply<()>>,
    },
    DeclareExchange {
        channel: ChannelId,
        spec: ExchangeSpec,
        reply: Reply<()>,
    },
    CheckExchange {
        channel: ChannelId,
        name: String,
        reply: Reply<()>,
    },
    DeclareQueue {
        channel: ChannelId,
        spec: QueueSpec,
        reply: Reply<QueueInfo>,
    },
    Bind {
        channel: ChannelId,
        queue: String,
        exchange: String,
        binding_key: String,
        reply: Reply<()>,
    },
    Publish {
        channel: ChannelId,
        exchange: String,
        routing_key: String,
        message: OutboundMessage,
        reply: Reply<()>,
    },
    Consume {
        channel: ChannelId,
        queue: String,
        options: ConsumeOptions,
        reply: Reply<Consumer>,
    },
    Ack {
        channel: ChannelId,
        tag: DeliveryTag,
        reply: Reply<()>,
    },
    Nack {
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
        reply: Reply<()>,
    },
    Inspect {
        queue: String,
        reply: oneshot::Sender<Option<QueueInfo>>,
    },
    Restart {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A message at rest in a queue or in flight to a consumer.
#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    content_type: Option<String>,
    headers: FieldTable,
    redelivered: bool,
}

struct Binding {
    queue: String,
    key: String,
}

struct Exchange {
    spec: ExchangeSpec,
    bindings: Vec<Binding>,
}

struct ConsumerEntry {
    tag: ConsumerTag,
    channel: ChannelId,
    prefetch: u16,
    in_flight: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ConsumerEntry {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < usize::from(self.prefetch)
    }
}

struct Queue {
    spec: QueueSpec,
    owner: Option<ConnectionId>,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerEntry>,
    cursor: usize,
    had_consumer: bool,
}

impl Queue {
    fn new(spec: QueueSpec, owner: Option<ConnectionId>) -> Self {
        Self {
            spec,
            owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
            had_consumer: false,
        }
    }

    /// Picks the next consumer with spare prefetch capacity, round-robin.
    fn next_consumer(&mut self) -> Option<usize> {
        self.consumers.retain(|c| !c.sender.is_closed());
        let n = self.consumers.len();
        if n == 0 {
            return None;
        }
        let start = self.cursor % n;
        let idx = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| self.consumers[i].has_capacity())?;
        self.cursor = idx + 1;
        Some(idx)
    }
}

struct Unacked {
    queue: String,
    consumer: ConsumerTag,
    message: StoredMessage,
}

struct ChannelState {
    conn: ConnectionId,
    next_tag: u64,
    unacked: BTreeMap<DeliveryTag, Unacked>,
}

struct BrokerActor {
    name: String,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<ConnectionId, HashSet<ChannelId>>,
    channels: HashMap<ChannelId, ChannelState>,
    next_connection: u64,
    next_channel: u64,
    receiver: mpsc::Receiver<BrokerCommand>,
}

/// Spawns the actor task and returns the sending half of its command
/// channel.
pub(crate) fn spawn(name: String, capacity: usize) -> mpsc::Sender<BrokerCommand> {
    let (sender, receiver) = mpsc::channel(capacity);
    let actor = BrokerActor {
        name,
        exchanges: HashMap::new(),
        queues: HashMap::new(),
        connections: HashMap::new(),
        channels: HashMap::new(),
        next_connection: 1,
        next_channel: 1,
        receiver,
    };
    tokio::spawn(actor.run());
    sender
}

impl BrokerActor {
    async fn run(mut self) {
        tracing::info!(broker = %self.name, "broker started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                BrokerCommand::Connect { reply } => {
                    let _ = reply.send(self.handle_connect());
                }
                BrokerCommand::CloseConnection { conn, reply } => {
                    let result = self.handle_close_connection(conn);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                BrokerCommand::OpenChannel { conn, reply } => {
                    let _ = reply.send(self.handle_open_channel(conn));
                }
                BrokerCommand::CloseChannel { channel, reply } => {
                    let result = self.handle_close_channel(channel);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                BrokerCommand::DeclareExchange {
                    channel,
                    spec,
                    reply,
                } => {
                    let _ = reply.send(self.handle_declare_exchange(channel, spec));
                }
                BrokerCommand::CheckExchange {
                    channel,
                    name,
                    reply,
                } => {
                    let _ = reply.send(self.handle_check_exchange(channel, &name));
                }
                BrokerCommand::DeclareQueue {
                    channel,
                    spec,
                    reply,
                } => {
                    let _ = reply.send(self.handle_declare_queue(channel, spec));
                }
                BrokerCommand::Bind {
                    channel,
                    queue,
                    exchange,
                    binding_key,
                    reply,
                } => {
                    let _ = reply.send(self.handle_bind(channel, &queue, &exchange, binding_key));
                }
                BrokerCommand::Publish {
                    channel,
                    exchange,
                    routing_key,
                    message,
                    reply,
                } => {
                    let result = self.handle_publish(channel, exchange, routing_key, message);
                    let _ = reply.send(result);
                }
                BrokerCommand::Consume {
                    channel,
                    queue,
                    options,
                    reply,
                } => {
                    let _ = reply.send(self.handle_consume(channel, &queue, options));
                }
                BrokerCommand::Ack {
                    channel,
                    tag,
                    reply,
                } => {
                    let _ = reply.send(self.handle_ack(channel, tag));
                }
                BrokerCommand::Nack {
                    channel,
                    tag,
                    requeue,
                    reply,
                } => {
                    let _ = reply.send(self.handle_nack(channel, tag, requeue));
                }
                BrokerCommand::Inspect { queue, reply } => {
                    let _ = reply.send(self.queue_info(&queue));
                }
                BrokerCommand::Restart { reply } => {
                    self.handle_restart();
                    let _ = reply.send(());
                }
                BrokerCommand::Shutdown => {
                    tracing::info!(broker = %self.name, "broker shutting down");
                    break;
                }
            }
        }

        tracing::info!(broker = %self.name, "broker stopped");
    }

    // -----------------------------------------------------------------------
    // Connections and channels
    // -----------------------------------------------------------------------

    fn handle_connect(&mut self) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        self.connections.insert(id, HashSet::new());
        tracing::info!(broker = %self.name, conn = %id, "connection opened");
        id
    }

    fn handle_close_connection(&mut self, conn: ConnectionId) -> Result<(), BrokerError> {
        let channels = self
            .connections
            .remove(&conn)
            .ok_or_else(|| BrokerError::ConnectionClosed(conn.to_string()))?;

        for channel in channels {
            let _ = self.handle_close_channel(channel);
        }

        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(conn))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }

        tracing::info!(broker = %self.name, %conn, "connection closed");
        Ok(())
    }

    fn handle_open_channel(&mut self, conn: ConnectionId) -> Result<ChannelId, BrokerError> {
        let channels = self
            .connections
            .get_mut(&conn)
            .ok_or_else(|| BrokerError::ConnectionClosed(conn.to_string()))?;
        let id = ChannelId::new(self.next_channel);
        self.next_channel += 1;
        channels.insert(id);
        self.channels.insert(
            id,
            ChannelState {
                conn,
                next_tag: 1,
                unacked: BTreeMap::new(),
            },
        );
        tracing::debug!(%conn, channel = %id, "channel opened");
        Ok(id)
    }

    /// Closes a channel: its consumers go away and everything it left
    /// unacknowledged goes back to the head of its queue, in order.
    fn handle_close_channel(&mut self, channel: ChannelId) -> Result<(), BrokerError> {
        let state = self
            .channels
            .remove(&channel)
            .ok_or_else(|| BrokerError::ChannelClosed(channel.to_string()))?;
        if let Some(set) = self.connections.get_mut(&state.conn) {
            set.remove(&channel);
        }

        let mut touched = HashSet::new();
        for (_, unacked) in state.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
                touched.insert(unacked.queue);
            }
        }

        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.channel != channel);
            if queue.consumers.len() != before {
                touched.insert(name.clone());
            }
        }

        for name in touched {
            if !self.auto_delete_if_unused(&name) {
                self.dispatch(&name);
            }
        }

        tracing::debug!(%channel, "channel closed");
        Ok(())
    }

    fn channel_conn(&self, channel: ChannelId) -> Result<ConnectionId, BrokerError> {
        self.channels
            .get(&channel)
            .map(|s| s.conn)
            .ok_or_else(|| BrokerError::ChannelClosed(channel.to_string()))
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    fn handle_declare_exchange(
        &mut self,
        channel: ChannelId,
        spec: ExchangeSpec,
    ) -> Result<(), BrokerError> {
        self.channel_conn(channel)?;
        if spec.name == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be declared".into(),
            ));
        }

        if let Some(existing) = self.exchanges.get(&spec.name) {
            if existing.spec != spec {
                return Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{}' exists as {} durable={}, redeclared as {} durable={}",
                    spec.name, existing.spec.kind, existing.spec.durable, spec.kind, spec.durable
                )));
            }
            return Ok(());
        }

        tracing::debug!(
            exchange = %spec.name,
            kind = %spec.kind,
            durable = spec.durable,
            "exchange declared"
        );
        self.exchanges.insert(
            spec.name.clone(),
            Exchange {
                spec,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    fn handle_check_exchange(&self, channel: ChannelId, name: &str) -> Result<(), BrokerError> {
        self.channel_conn(channel)?;
        if name == DEFAULT_EXCHANGE || self.exchanges.contains_key(name) {
            Ok(())
        } else {
            Err(BrokerError::exchange_not_found(name))
        }
    }

    fn handle_declare_queue(
        &mut self,
        channel: ChannelId,
        mut spec: QueueSpec,
    ) -> Result<QueueInfo, BrokerError> {
        let conn = self.channel_conn(channel)?;

        if spec.name.is_empty() {
            spec.name = generate_name("amq.gen-");
        }

        if let Some(existing) = self.queues.get(&spec.name) {
            check_owner(existing, &spec.name, conn)?;
            if existing.spec != spec {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' redeclared with different parameters",
                    spec.name
                )));
            }
        } else {
            tracing::debug!(
                queue = %spec.name,
                durable = spec.durable,
                exclusive = spec.exclusive,
                auto_delete = spec.auto_delete,
                "queue declared"
            );
            let owner = spec.exclusive.then_some(conn);
            self.queues
                .insert(spec.name.clone(), Queue::new(spec.clone(), owner));
        }

        self.queue_info(&spec.name)
            .ok_or_else(|| BrokerError::queue_not_found(&spec.name))
    }

    fn handle_bind(
        &mut self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        binding_key: String,
    ) -> Result<(), BrokerError> {
        let conn = self.channel_conn(channel)?;
        let q = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        check_owner(q, queue, conn)?;

        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "queues cannot be bound to the default exchange".into(),
            ));
        }
        let ex = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;

        if !ex
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.key == binding_key)
        {
            tracing::debug!(%queue, %exchange, %binding_key, "queue bound");
            ex.bindings.push(Binding {
                queue: queue.to_string(),
                key: binding_key,
            });
        }
        Ok(())
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_none() {
            return;
        }
        for ex in self.exchanges.values_mut() {
            ex.bindings.retain(|b| b.queue != name);
        }
        tracing::debug!(queue = %name, "queue deleted");
    }

    /// Deletes an auto-delete queue once its last consumer is gone.
    /// Returns `true` if the queue was deleted.
    fn auto_delete_if_unused(&mut self, name: &str) -> bool {
        let unused = self
            .queues
            .get(name)
            .is_some_and(|q| q.spec.auto_delete && q.had_consumer && q.consumers.is_empty());
        if unused {
            self.delete_queue(name);
        }
        unused
    }

    // -----------------------------------------------------------------------
    // Publishing and routing
    // -----------------------------------------------------------------------

    fn handle_publish(
        &mut self,
        channel: ChannelId,
        exchange: String,
        routing_key: String,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.channel_conn(channel)?;
        let stored = StoredMessage {
            exchange,
            routing_key,
            payload: message.payload,
            content_type: message.content_type,
            headers: message.headers,
            redelivered: false,
        };
        let exchange = stored.exchange.clone();
        let routing_key = stored.routing_key.clone();
        self.route(&exchange, &routing_key, stored)
    }

    /// Appends a copy of the message to every queue the exchange routes
    /// `routing_key` to, then pushes deliveries to their consumers.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: StoredMessage,
    ) -> Result<(), BrokerError> {
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            self.queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default()
        } else {
            let ex = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
            let mut seen = HashSet::new();
            ex.bindings
                .iter()
                .filter(|b| binding_matches(ex.spec.kind, &b.key, routing_key))
                .filter(|b| seen.insert(b.queue.clone()))
                .map(|b| b.queue.clone())
                .collect()
        };

        if targets.is_empty() {
            tracing::debug!(%exchange, %routing_key, "message unroutable, dropped");
            return Ok(());
        }

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(message.clone());
                tracing::debug!(%exchange, %routing_key, queue = %name, "message routed");
            }
            self.dispatch(&name);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consuming
    // -----------------------------------------------------------------------

    fn handle_consume(
        &mut self,
        channel: ChannelId,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Consumer, BrokerError> {
        let conn = self.channel_conn(channel)?;
        let q = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        check_owner(q, queue, conn)?;

        let tag = ConsumerTag(options.tag.unwrap_or_else(|| generate_name("ctag-")));
        if q.consumers.iter().any(|c| c.tag == tag) {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{tag}' already in use on queue '{queue}'"
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(q) = self.queues.get_mut(queue) {
            q.had_consumer = true;
            q.consumers.push(ConsumerEntry {
                tag: tag.clone(),
                channel,
                prefetch: options.prefetch,
                in_flight: 0,
                sender,
            });
        }
        tracing::debug!(%queue, consumer = %tag, prefetch = options.prefetch, "consumer started");

        self.dispatch(queue);
        Ok(Consumer::new(tag, queue, receiver))
    }

    /// Pushes ready messages to consumers with spare prefetch capacity.
    fn dispatch(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.ready.is_empty() {
            let Some(idx) = queue.next_consumer() else {
                break;
            };
            let consumer = &mut queue.consumers[idx];
            let Some(channel) = self.channels.get_mut(&consumer.channel) else {
                queue.consumers.remove(idx);
                continue;
            };
            let Some(message) = queue.ready.pop_front() else {
                break;
            };

            let tag = DeliveryTag(channel.next_tag);
            let delivery = Delivery {
                delivery_tag: tag,
                consumer_tag: consumer.tag.clone(),
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                payload: message.payload.clone(),
                content_type: message.content_type.clone(),
                headers: message.headers.clone(),
            };

            if consumer.sender.send(delivery).is_err() {
                queue.ready.push_front(message);
                queue.consumers.remove(idx);
                continue;
            }

            channel.next_tag += 1;
            consumer.in_flight += 1;
            channel.unacked.insert(
                tag,
                Unacked {
                    queue: queue_name.to_string(),
                    consumer: consumer.tag.clone(),
                    message,
                },
            );
        }
    }

    /// Removes a settled delivery from its channel and frees the
    /// consumer's prefetch slot.
    fn settle(&mut self, channel: ChannelId, tag: DeliveryTag) -> Result<Unacked, BrokerError> {
        let state = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| BrokerError::ChannelClosed(channel.to_string()))?;
        let unacked = state
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag.0))?;

        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            if let Some(c) = queue
                .consumers
                .iter_mut()
                .find(|c| c.channel == channel && c.tag == unacked.consumer)
            {
                c.in_flight = c.in_flight.saturating_sub(1);
            }
        }
        Ok(unacked)
    }

    fn handle_ack(&mut self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError> {
        let unacked = self.settle(channel, tag)?;
        tracing::debug!(%channel, delivery_tag = %tag, queue = %unacked.queue, "ack");
        self.dispatch(&unacked.queue);
        Ok(())
    }

    fn handle_nack(
        &mut self,
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let unacked = self.settle(channel, tag)?;
        let queue_name = unacked.queue;
        let mut message = unacked.message;

        if requeue {
            tracing::debug!(%channel, delivery_tag = %tag, queue = %queue_name, "nack, requeued");
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        } else {
            self.dead_letter(&queue_name, message);
        }

        self.dispatch(&queue_name);
        Ok(())
    }

    /// Republishes a rejected message to its queue's dead-letter exchange
    /// under the original routing key, or drops it if there is none.
    fn dead_letter(&mut self, queue_name: &str, mut message: StoredMessage) {
        let dlx = self
            .queues
            .get(queue_name)
            .and_then(|q| q.spec.dead_letter_exchange())
            .map(str::to_string);

        let Some(dlx) = dlx else {
            tracing::debug!(queue = %queue_name, "nack, discarded");
            return;
        };

        message
            .headers
            .entry(X_FIRST_DEATH_QUEUE.to_string())
            .or_insert_with(|| queue_name.to_string());
        message
            .headers
            .entry(X_FIRST_DEATH_EXCHANGE.to_string())
            .or_insert_with(|| message.exchange.clone());
        message
            .headers
            .entry(X_FIRST_DEATH_REASON.to_string())
            .or_insert_with(|| "rejected".to_string());
        message.exchange = dlx.clone();
        message.redelivered = false;

        let routing_key = message.routing_key.clone();
        match self.route(&dlx, &routing_key, message) {
            Ok(()) => {
                tracing::debug!(
                    queue = %queue_name,
                    exchange = %dlx,
                    %routing_key,
                    "message dead-lettered"
                );
            }
            Err(e) => {
                tracing::warn!(
                    queue = %queue_name,
                    exchange = %dlx,
                    error = %e,
                    "dead-letter exchange missing, message dropped"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inspection and restart
    // -----------------------------------------------------------------------

    fn queue_info(&self, name: &str) -> Option<QueueInfo> {
        let queue = self.queues.get(name)?;
        let unacked = self
            .channels
            .values()
            .flat_map(|c| c.unacked.values())
            .filter(|u| u.queue == name)
            .count();
        Some(QueueInfo {
            name: name.to_string(),
            ready: queue.ready.len(),
            unacked,
            consumers: queue.consumers.len(),
        })
    }

    /// Simulates a broker restart: every connection drops, and only durable
    /// exchanges, durable queues, the bindings between them, and the
    /// messages in those queues survive.
    fn handle_restart(&mut self) {
        let conns: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn in conns {
            let _ = self.handle_close_connection(conn);
        }

        self.exchanges.retain(|_, ex| ex.spec.durable);
        let transient: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.spec.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in transient {
            self.delete_queue(&name);
        }
        for queue in self.queues.values_mut() {
            queue.consumers.clear();
            queue.had_consumer = false;
            for message in queue.ready.iter_mut() {
                message.redelivered = true;
            }
        }

        tracing::info!(
            broker = %self.name,
            exchanges = self.exchanges.len(),
            queues = self.queues.len(),
            "broker restarted"
        );
    }
}

/// Fails with `ResourceLocked` if the queue is exclusive to another
/// connection.
fn check_owner(queue: &Queue, name: &str, conn: ConnectionId) -> Result<(), BrokerError> {
    match queue.owner {
        Some(owner) if owner != conn => Err(BrokerError::ResourceLocked(name.to_string())),
        _ => Ok(()),
    }
}

/// Generates a broker-assigned name: `prefix` plus 16 random hex chars.
fn generate_name(prefix: &str) -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 8] = rng.random();
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}{suffix}")
}
