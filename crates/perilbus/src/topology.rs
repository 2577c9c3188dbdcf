//! Exchange and queue topology.
//!
//! The topology manager declares exchanges and queues idempotently and
//! binds queues under routing-key patterns. It is the only place that
//! turns a [`Durability`] class and a [`DeadLetterConfig`] into broker
//! queue flags, and it always does so before anything consumes the queue.
//!
//! # Routing keys
//!
//! Keys are dot-delimited segments. One segment usually carries a player
//! name (`army_moves.alice`), and a topic binding such as `army_moves.*`
//! observes every player at once.

use std::collections::HashMap;
use std::sync::Mutex;

use perilbus_broker::{
    Channel, Connection, ExchangeKind, ExchangeSpec, QueueInfo, QueueSpec, X_DEAD_LETTER_EXCHANGE,
};
use serde::{Deserialize, Serialize};

use crate::{BusError, TopologyError};

// ---------------------------------------------------------------------------
// Durability
// ---------------------------------------------------------------------------

/// How long a queue lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Survives broker restarts; shared between connections; never
    /// deleted automatically.
    Durable,
    /// Exclusive to the declaring connection and deleted when it closes.
    Transient,
}

impl Durability {
    /// Returns `true` for [`Durability::Durable`].
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }
}

impl std::fmt::Display for Durability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Where a queue sends the messages its consumers discard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeadLetterConfig {
    /// The dead-letter exchange.
    pub exchange: String,
}

impl DeadLetterConfig {
    /// Dead-letters into `exchange`.
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueBinding
// ---------------------------------------------------------------------------

/// A queue to declare and the binding that feeds it.
///
/// # Example
///
/// ```rust
/// use perilbus::{DeadLetterConfig, Durability, QueueBinding};
///
/// let war = QueueBinding::new("peril_topic", "war", "war.*", Durability::Durable)
///     .dead_letter(DeadLetterConfig::new("peril_dlx"));
/// assert_eq!(war.queue_spec().dead_letter_exchange(), Some("peril_dlx"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    /// Exchange to bind to.
    pub exchange: String,
    /// Queue name. Empty lets the broker generate one.
    pub queue: String,
    /// Binding key; may contain `*` and `#` on topic exchanges.
    pub routing_key: String,
    /// Queue lifetime.
    pub durability: Durability,
    /// Dead-letter target, set at declaration.
    pub dead_letter: Option<DeadLetterConfig>,
    /// When set, the exchange is declared with this spec first instead of
    /// being expected to exist.
    pub declare_exchange: Option<ExchangeSpec>,
}

impl QueueBinding {
    /// A binding with no dead-lettering that expects the exchange to
    /// exist.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        durability: Durability,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            durability,
            dead_letter: None,
            declare_exchange: None,
        }
    }

    /// Sets the dead-letter target.
    pub fn dead_letter(mut self, config: DeadLetterConfig) -> Self {
        self.dead_letter = Some(config);
        self
    }

    /// Sets the dead-letter target from an optional exchange name, as it
    /// comes out of [`BusConfig`](crate::BusConfig).
    pub fn dead_letter_opt(mut self, exchange: Option<&str>) -> Self {
        self.dead_letter = exchange.map(DeadLetterConfig::new);
        self
    }

    /// Declares the exchange (with the given kind and durability) before
    /// binding.
    pub fn auto_declare(mut self, kind: ExchangeKind, durable: bool) -> Self {
        self.declare_exchange = Some(ExchangeSpec {
            name: self.exchange.clone(),
            kind,
            durable,
        });
        self
    }

    /// The broker queue descriptor for this binding.
    ///
    /// Durable queues are shared and kept; transient queues are exclusive
    /// and auto-deleted.
    pub fn queue_spec(&self) -> QueueSpec {
        let mut spec = QueueSpec {
            name: self.queue.clone(),
            durable: self.durability.is_durable(),
            exclusive: !self.durability.is_durable(),
            auto_delete: !self.durability.is_durable(),
            ..Default::default()
        };
        if let Some(dl) = &self.dead_letter {
            spec.arguments
                .insert(X_DEAD_LETTER_EXCHANGE.to_string(), dl.exchange.clone());
        }
        spec
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Declares exchanges and queues over one connection.
///
/// Remembers the exchanges it declared so that binding a durable queue to
/// a non-durable one is refused up front. Exchanges declared by other
/// processes are not known here; the broker still reports them missing
/// with [`BrokerError::NotFound`](perilbus_broker::BrokerError::NotFound).
pub struct Topology<'c, C: Connection> {
    conn: &'c C,
    exchanges: Mutex<HashMap<String, ExchangeSpec>>,
}

impl<'c, C: Connection> Topology<'c, C> {
    /// Creates a topology manager for `conn`.
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            exchanges: Mutex::new(HashMap::new()),
        }
    }

    /// The connection this manager declares over.
    pub fn connection(&self) -> &'c C {
        self.conn
    }

    /// Declares an exchange. Idempotent for identical parameters; a
    /// conflicting redeclaration fails with
    /// [`BrokerError::PreconditionFailed`](perilbus_broker::BrokerError::PreconditionFailed).
    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BusError> {
        let spec = ExchangeSpec {
            name: name.to_string(),
            kind,
            durable,
        };
        let channel = self.conn.open_channel().await?;
        let result = self.declare_on(&channel, &spec).await;
        let _ = channel.close().await;
        result
    }

    async fn declare_on(&self, channel: &C::Channel, spec: &ExchangeSpec) -> Result<(), BusError> {
        channel.declare_exchange(spec).await?;
        self.remember(spec.clone());
        tracing::info!(
            exchange = %spec.name,
            kind = %spec.kind,
            durable = spec.durable,
            "exchange declared"
        );
        Ok(())
    }

    fn remember(&self, spec: ExchangeSpec) {
        let mut exchanges = self
            .exchanges
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        exchanges.insert(spec.name.clone(), spec);
    }

    fn known_durability(&self, exchange: &str) -> Option<bool> {
        let exchanges = self
            .exchanges
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        exchanges.get(exchange).map(|spec| spec.durable)
    }

    /// Opens a dedicated channel, declares the queue with its durability
    /// class and dead-letter target, and binds it to the exchange.
    ///
    /// The exchange is checked before the queue is declared, so a missing
    /// exchange fails with `NotFound` and declares nothing.
    ///
    /// Returns the channel (for consuming) and the declared queue, whose
    /// name is the generated one if `binding.queue` was empty.
    pub async fn declare_and_bind(
        &self,
        binding: &QueueBinding,
    ) -> Result<(C::Channel, QueueInfo), BusError> {
        let exchange_durable = binding
            .declare_exchange
            .as_ref()
            .map(|spec| spec.durable)
            .or_else(|| self.known_durability(&binding.exchange));
        if binding.durability.is_durable() && exchange_durable == Some(false) {
            return Err(TopologyError::DurabilityMismatch {
                queue: binding.queue.clone(),
                exchange: binding.exchange.clone(),
            }
            .into());
        }

        let channel = self.conn.open_channel().await?;
        if let Some(spec) = &binding.declare_exchange {
            self.declare_on(&channel, spec).await?;
        }
        // A missing exchange must not leave an unbound queue behind.
        channel.declare_exchange_passive(&binding.exchange).await?;

        let info = channel.declare_queue(&binding.queue_spec()).await?;
        channel
            .bind_queue(&info.name, &binding.exchange, &binding.routing_key)
            .await?;

        tracing::info!(
            queue = %info.name,
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            durability = %binding.durability,
            dead_letter = ?binding.dead_letter.as_ref().map(|d| &d.exchange),
            "queue declared and bound"
        );
        Ok((channel, info))
    }
}
