//! In-process reference broker.
//!
//! [`MemoryBroker`] implements the exchange/queue/binding model with the
//! same observable semantics a routing broker has: durable and transient
//! entities, prefetch-bounded consumers, ack/nack/requeue, dead-lettering,
//! exclusive queues that die with their connection. All state lives in a
//! single actor task; the handles below only send it commands.
//!
//! ```text
//! MemoryConnection ──┐
//! MemoryChannel ─────┼── mpsc ──▶ broker actor (exchanges, queues, unacked)
//! MemoryBroker ──────┘
//! ```

mod actor;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use self::actor::BrokerCommand;
use crate::{
    BrokerError, Channel, ChannelId, Connection, ConnectionId, ConsumeOptions, Consumer,
    DeliveryTag, ExchangeSpec, OutboundMessage, QueueInfo, QueueSpec,
};

/// Address scheme understood by [`connect`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Bound on queued commands per broker.
const COMMAND_BUFFER: usize = 1024;

/// Brokers started through [`connect`] / [`MemoryBroker::named`], by name.
static REGISTRY: OnceLock<Mutex<HashMap<String, MemoryBroker>>> = OnceLock::new();

/// Connects to the named in-process broker at `memory://<name>`, starting
/// it on first use.
///
/// Must be called from within a Tokio runtime.
pub async fn connect(url: &str) -> Result<MemoryConnection, BrokerError> {
    let name = url
        .strip_prefix(MEMORY_SCHEME)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| BrokerError::InvalidAddress(url.to_string()))?;
    MemoryBroker::named(name).connect().await
}

/// Sends a command and waits for the actor's reply.
async fn request<T>(
    sender: &mpsc::Sender<BrokerCommand>,
    make: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
) -> Result<T, BrokerError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    sender
        .send(make(reply_tx))
        .await
        .map_err(|_| BrokerError::Unavailable)?;
    reply_rx.await.map_err(|_| BrokerError::Unavailable)
}

/// Sends a command without waiting, for use from `Drop`.
fn send_detached(sender: &mpsc::Sender<BrokerCommand>, cmd: BrokerCommand) {
    match sender.try_send(cmd) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(cmd)) => {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let sender = sender.clone();
                handle.spawn(async move {
                    let _ = sender.send(cmd).await;
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// Handle to a running in-process broker. Cheap to clone.
#[derive(Clone)]
pub struct MemoryBroker {
    name: Arc<str>,
    sender: mpsc::Sender<BrokerCommand>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MemoryBroker {
    /// Starts a private broker, not reachable through [`connect`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let sender = actor::spawn(name.clone(), COMMAND_BUFFER);
        Self {
            name: name.into(),
            sender,
        }
    }

    /// Returns the registered broker with this name, starting one if there
    /// is none or the previous one has stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn named(name: &str) -> Self {
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut brokers = registry.lock().unwrap_or_else(PoisonError::into_inner);
        match brokers.get(name) {
            Some(broker) if !broker.sender.is_closed() => broker.clone(),
            _ => {
                let broker = Self::start(name);
                brokers.insert(name.to_string(), broker.clone());
                broker
            }
        }
    }

    /// The broker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a new connection.
    pub async fn connect(&self) -> Result<MemoryConnection, BrokerError> {
        let id = request(&self.sender, |reply| BrokerCommand::Connect { reply }).await?;
        Ok(MemoryConnection {
            inner: Arc::new(ConnectionInner {
                id,
                sender: self.sender.clone(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Returns a snapshot of a queue's counters, or `None` if the queue
    /// does not exist.
    pub async fn queue_info(&self, queue: &str) -> Result<Option<QueueInfo>, BrokerError> {
        let queue = queue.to_string();
        request(&self.sender, |reply| BrokerCommand::Inspect { queue, reply }).await
    }

    /// Returns the number of messages ready for delivery on a queue.
    pub async fn queue_depth(&self, queue: &str) -> Result<usize, BrokerError> {
        self.queue_info(queue)
            .await?
            .map(|info| info.ready)
            .ok_or_else(|| BrokerError::queue_not_found(queue))
    }

    /// Simulates a broker restart.
    ///
    /// Every connection is dropped (their consumer streams end and further
    /// calls fail with [`BrokerError::ConnectionClosed`] or
    /// [`BrokerError::ChannelClosed`]). Durable exchanges, durable queues,
    /// the bindings between them, and the messages held by durable queues
    /// survive; everything else is gone.
    pub async fn restart(&self) -> Result<(), BrokerError> {
        request(&self.sender, |reply| BrokerCommand::Restart { reply }).await
    }

    /// Stops the broker task. Outstanding handles start failing with
    /// [`BrokerError::Unavailable`].
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerCommand::Shutdown)
            .await
            .map_err(|_| BrokerError::Unavailable)
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

struct ConnectionInner {
    id: ConnectionId,
    sender: mpsc::Sender<BrokerCommand>,
    closed: AtomicBool,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            send_detached(
                &self.sender,
                BrokerCommand::CloseConnection {
                    conn: self.id,
                    reply: None,
                },
            );
        }
    }
}

/// A connection to a [`MemoryBroker`]. Clones share the connection; it
/// closes when [`Connection::close`] is called or the last clone drops.
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    async fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let conn = self.inner.id;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ConnectionClosed(conn.to_string()));
        }
        let id = request(&self.inner.sender, |reply| BrokerCommand::OpenChannel {
            conn,
            reply,
        })
        .await??;
        Ok(MemoryChannel {
            id,
            sender: self.inner.sender.clone(),
            closed: AtomicBool::new(false),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = self.inner.id;
        request(&self.inner.sender, |reply| BrokerCommand::CloseConnection {
            conn,
            reply: Some(reply),
        })
        .await?
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// A channel on a [`MemoryConnection`]. Closes on drop.
pub struct MemoryChannel {
    id: ChannelId,
    sender: mpsc::Sender<BrokerCommand>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            send_detached(
                &self.sender,
                BrokerCommand::CloseChannel {
                    channel: self.id,
                    reply: None,
                },
            );
        }
    }
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::ChannelClosed(self.id.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let (channel, spec) = (self.id, spec.clone());
        request(&self.sender, |reply| BrokerCommand::DeclareExchange {
            channel,
            spec,
            reply,
        })
        .await?
    }

    async fn declare_exchange_passive(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let (channel, name) = (self.id, name.to_string());
        request(&self.sender, |reply| BrokerCommand::CheckExchange {
            channel,
            name,
            reply,
        })
        .await?
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<QueueInfo, BrokerError> {
        self.ensure_open()?;
        let (channel, spec) = (self.id, spec.clone());
        request(&self.sender, |reply| BrokerCommand::DeclareQueue {
            channel,
            spec,
            reply,
        })
        .await?
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let channel = self.id;
        let (queue, exchange, binding_key) =
            (queue.to_string(), exchange.to_string(), binding_key.to_string());
        request(&self.sender, |reply| BrokerCommand::Bind {
            channel,
            queue,
            exchange,
            binding_key,
            reply,
        })
        .await?
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let channel = self.id;
        let (exchange, routing_key) = (exchange.to_string(), routing_key.to_string());
        request(&self.sender, |reply| BrokerCommand::Publish {
            channel,
            exchange,
            routing_key,
            message,
            reply,
        })
        .await?
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError> {
        self.ensure_open()?;
        let channel = self.id;
        let queue = queue.to_string();
        request(&self.sender, |reply| BrokerCommand::Consume {
            channel,
            queue,
            options,
            reply,
        })
        .await?
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let channel = self.id;
        request(&self.sender, |reply| BrokerCommand::Ack {
            channel,
            tag,
            reply,
        })
        .await?
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let channel = self.id;
        request(&self.sender, |reply| BrokerCommand::Nack {
            channel,
            tag,
            requeue,
            reply,
        })
        .await?
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let channel = self.id;
        match request(&self.sender, |reply| BrokerCommand::CloseChannel {
            channel,
            reply: Some(reply),
        })
        .await?
        {
            // Already closed by its connection.
            Err(BrokerError::ChannelClosed(_)) => Ok(()),
            other => other,
        }
    }
}
