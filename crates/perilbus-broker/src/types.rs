//! Types that cross the broker boundary: exchange and queue descriptors,
//! outbound messages, deliveries, and the consumer stream.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::mpsc;

/// Queue argument naming the dead-letter exchange.
pub const X_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Header set on a dead-lettered message: the queue it was rejected from.
pub const X_FIRST_DEATH_QUEUE: &str = "x-first-death-queue";

/// Header set on a dead-lettered message: the exchange it was first
/// published to.
pub const X_FIRST_DEATH_EXCHANGE: &str = "x-first-death-exchange";

/// Header set on a dead-lettered message: why it died.
pub const X_FIRST_DEATH_REASON: &str = "x-first-death-reason";

/// The nameless default exchange. Publishing to it delivers straight to
/// the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// String key/value table used for queue arguments and message headers.
pub type FieldTable = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opaque identifier for a logical channel on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Creates a new `ChannelId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Identifies one delivery for acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names a consumer on a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

/// How an exchange routes messages to its bound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routing key must equal the binding key.
    Direct,
    /// Binding key is a dot-segmented pattern with `*` and `#` wildcards.
    Topic,
    /// Every bound queue gets a copy; keys are ignored.
    Fanout,
}

impl ExchangeKind {
    /// Returns the conventional lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that identifies an exchange. Two declarations of the same
/// name must carry equal specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name.
    pub name: String,
    /// Routing discipline.
    pub kind: ExchangeKind,
    /// Survives a broker restart.
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable exchange of the given kind.
    pub fn durable(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    /// A non-durable exchange of the given kind.
    pub fn transient(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Everything that identifies a queue. Two declarations of the same name
/// must carry equal flags and arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueSpec {
    /// Queue name. Empty asks the broker to generate one.
    pub name: String,
    /// Survives a broker restart.
    pub durable: bool,
    /// Usable only by the declaring connection; deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    /// Extra arguments, e.g. [`X_DEAD_LETTER_EXCHANGE`].
    pub arguments: FieldTable,
}

impl QueueSpec {
    /// Returns the configured dead-letter exchange, if any.
    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.arguments
            .get(X_DEAD_LETTER_EXCHANGE)
            .map(String::as_str)
    }
}

/// A snapshot of a queue's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// The queue name (generated names included).
    pub name: String,
    /// Messages ready for delivery.
    pub ready: usize,
    /// Messages delivered but not yet acknowledged.
    pub unacked: usize,
    /// Active consumers.
    pub consumers: usize,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message handed to the broker for routing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundMessage {
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Tag naming the codec that produced the payload.
    pub content_type: Option<String>,
    /// Free-form headers.
    pub headers: FieldTable,
}

impl OutboundMessage {
    /// A message with the given payload and content type, no headers.
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            payload,
            content_type: Some(content_type.into()),
            headers: FieldTable::new(),
        }
    }
}

/// A message handed from the broker to a consumer.
///
/// It stays unacknowledged until the owning channel acks or nacks its
/// [`DeliveryTag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag to ack/nack with.
    pub delivery_tag: DeliveryTag,
    /// The consumer this delivery was pushed to.
    pub consumer_tag: ConsumerTag,
    /// The exchange the message was published to.
    pub exchange: String,
    /// The routing key it was published with.
    pub routing_key: String,
    /// `true` if this message was delivered before and requeued.
    pub redelivered: bool,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Tag naming the codec that produced the payload.
    pub content_type: Option<String>,
    /// Headers, including `x-first-death-*` on dead-lettered messages.
    pub headers: FieldTable,
}

// ---------------------------------------------------------------------------
// Consuming
// ---------------------------------------------------------------------------

/// Options for starting a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Maximum unacknowledged deliveries held by this consumer.
    /// 0 means unlimited.
    pub prefetch: u16,
    /// Consumer tag; generated when `None`.
    pub tag: Option<String>,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            prefetch: 10,
            tag: None,
        }
    }
}

impl ConsumeOptions {
    /// Options with the given prefetch and a generated tag.
    pub fn with_prefetch(prefetch: u16) -> Self {
        Self {
            prefetch,
            ..Default::default()
        }
    }
}

/// The receiving end of a consumer: an ordered stream of deliveries.
///
/// The stream ends (`next` returns `None`) when the channel that created
/// the consumer closes, when its connection closes, or when the broker
/// goes away.
#[derive(Debug)]
pub struct Consumer {
    tag: ConsumerTag,
    queue: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Consumer {
    /// Wraps a delivery receiver. Transports feed the sending half.
    pub fn new(
        tag: ConsumerTag,
        queue: impl Into<String>,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            tag,
            queue: queue.into(),
            deliveries,
        }
    }

    /// Waits for the next delivery. `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Returns a delivery if one is already buffered.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.deliveries.try_recv().ok()
    }

    /// The consumer tag.
    pub fn tag(&self) -> &ConsumerTag {
        &self.tag
    }

    /// The queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }
}
