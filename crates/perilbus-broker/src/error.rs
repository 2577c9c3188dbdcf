/// Errors that can occur at the broker boundary.
///
/// The variants follow the broker's own failure classes: a missing
/// entity, a conflicting redeclaration, a closed connection or channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The connection is closed (or was never opened).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The channel is closed; open a new one.
    #[error("channel {0} is closed")]
    ChannelClosed(String),

    /// An exchange or queue does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// `"exchange"` or `"queue"`.
        kind: &'static str,
        /// The missing entity's name.
        name: String,
    },

    /// A redeclaration with parameters that differ from the existing
    /// entity, or another request the broker refuses as inconsistent.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The queue is exclusive to another connection.
    #[error("queue '{0}' is locked by another connection")]
    ResourceLocked(String),

    /// The delivery tag is unknown on this channel (already settled or
    /// delivered on another channel).
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// The broker address could not be understood.
    #[error("invalid broker address: {0}")]
    InvalidAddress(String),

    /// The broker itself is gone (its task stopped).
    #[error("broker unavailable")]
    Unavailable,
}

impl BrokerError {
    pub(crate) fn exchange_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "exchange",
            name: name.to_string(),
        }
    }

    pub(crate) fn queue_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "queue",
            name: name.to_string(),
        }
    }

    /// Returns `true` when retrying on a fresh channel or connection could
    /// succeed, i.e. the fault is in the transport and not in the request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::ChannelClosed(_) | Self::Unavailable
        )
    }
}
