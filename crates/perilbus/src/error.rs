//! Unified error type for the Peril bus.

use perilbus_broker::BrokerError;
use perilbus_codec::CodecError;

/// A topology request the bus refuses before it reaches the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// A durable queue bound to a non-durable exchange would lose its
    /// routing on broker restart.
    #[error("durable queue '{queue}' cannot be bound to non-durable exchange '{exchange}'")]
    DurabilityMismatch {
        /// The queue being declared.
        queue: String,
        /// The exchange it was to be bound to.
        exchange: String,
    },
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts broker, codec and configuration errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A broker-level error (connection, channel, declaration, ack).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A codec-level error (encode, decode, bad frame).
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A topology request rejected by the bus itself.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A subscription task panicked or was aborted.
    #[error("subscription task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BusError {
    /// Returns `true` if the fault is in the transport, i.e. the broker
    /// connection or a channel went away.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Broker(e) if e.is_transport())
    }
}
