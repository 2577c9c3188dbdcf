//! Broker transport boundary for the Peril message bus.
//!
//! Provides the [`Connection`] and [`Channel`] traits that abstract over a
//! routing broker: exchanges, queues, bindings, prefetch-bounded consumers,
//! and per-delivery acknowledgment. The dispatch layer above only talks to
//! these traits, so a networked AMQP client and the in-process
//! [`MemoryBroker`] are interchangeable.
//!
//! # Feature Flags
//!
//! - `memory` (default): the in-process reference broker.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "memory")]
mod memory;
pub mod routing;
mod types;

pub use error::BrokerError;
#[cfg(feature = "memory")]
pub use memory::{MEMORY_SCHEME, MemoryBroker, MemoryChannel, MemoryConnection, connect};
pub use types::{
    ChannelId, ConnectionId, ConsumeOptions, Consumer, ConsumerTag, DEFAULT_EXCHANGE, Delivery,
    DeliveryTag, ExchangeKind, ExchangeSpec, FieldTable, OutboundMessage, QueueInfo, QueueSpec,
    X_DEAD_LETTER_EXCHANGE, X_FIRST_DEATH_EXCHANGE, X_FIRST_DEATH_QUEUE, X_FIRST_DEATH_REASON,
};

/// A live connection to a broker.
///
/// A connection is only a factory for [`Channel`]s. Closing it ends every
/// channel opened on it and deletes the exclusive queues it declared.
pub trait Connection: Send + Sync + 'static {
    /// The channel type opened on this connection.
    type Channel: Channel;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Opens a new logical channel.
    fn open_channel(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Channel, BrokerError>> + Send;

    /// Closes the connection and everything opened on it.
    fn close(&self) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;
}

/// A logical channel multiplexed over a [`Connection`].
///
/// Deliveries are acknowledged on the channel whose consumer received
/// them. When a channel closes, its unacknowledged deliveries go back to
/// their queues and its consumer streams end.
pub trait Channel: Send + Sync + 'static {
    /// Returns the unique identifier for this channel.
    fn id(&self) -> ChannelId;

    /// Declares an exchange. Idempotent for identical specs; a differing
    /// kind or durability fails with [`BrokerError::PreconditionFailed`].
    fn declare_exchange(
        &self,
        spec: &ExchangeSpec,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Checks that an exchange exists without creating or changing it.
    /// Fails with [`BrokerError::NotFound`] if it does not.
    fn declare_exchange_passive(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Declares a queue and returns its counters.
    ///
    /// An empty name asks the broker to generate one; the generated name is
    /// in the returned [`QueueInfo`].
    fn declare_queue(
        &self,
        spec: &QueueSpec,
    ) -> impl std::future::Future<Output = Result<QueueInfo, BrokerError>> + Send;

    /// Binds a queue to an exchange under a routing-key pattern.
    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Publishes a message. Completes once the broker has routed it.
    ///
    /// A message that matches no binding is dropped, as a broker does for
    /// unroutable, non-mandatory publishes.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Starts consuming a queue with manual acknowledgment.
    fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> impl std::future::Future<Output = Result<Consumer, BrokerError>> + Send;

    /// Acknowledges a delivery. The message is gone for good.
    fn ack(
        &self,
        tag: DeliveryTag,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Rejects a delivery.
    ///
    /// With `requeue` the message returns to the head of its queue and is
    /// redelivered. Without it the message is dead-lettered if the queue
    /// has a dead-letter exchange, and dropped otherwise.
    fn nack(
        &self,
        tag: DeliveryTag,
        requeue: bool,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;

    /// Closes the channel.
    fn close(&self) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;
}
