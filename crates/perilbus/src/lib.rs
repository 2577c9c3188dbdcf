//! # perilbus
//!
//! Publish/subscribe dispatch layer for the Peril game bus.
//!
//! Game code publishes typed events with a [`Publisher`] and consumes them
//! with [`subscribe`]: the bus declares and binds the queue, decodes each
//! delivery, calls the handler, and turns the handler's [`Verdict`] into an
//! ack or nack. Poison messages go to the dead-letter exchange.
//!
//! ```text
//! Publisher ─encode─▶ exchange ─route─▶ queue ─▶ dispatcher task ─decode─▶ Handler
//!                                          ▲                                  │
//!                                          └──────── ack / nack ◀── Verdict ◀─┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use perilbus::prelude::*;
//! use perilbus_broker::ExchangeKind;
//!
//! # async fn run() -> Result<(), BusError> {
//! let config = BusConfig::load()?;
//! let conn = perilbus::connect(&config).await?;
//! let topology = Topology::new(&conn);
//! topology.declare_exchange("peril_direct", ExchangeKind::Direct, true).await?;
//!
//! let binding = QueueBinding::new("peril_direct", "pause.alice", "pause", Durability::Transient);
//! let _sub = subscribe(
//!     &topology,
//!     SubscriptionSpec::from_config(binding, &config),
//!     Handler::pure(|paused: bool| {
//!         println!("paused: {paused}");
//!         Verdict::Ack
//!     }),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod dispatcher;
mod error;
mod handler;
mod publisher;
pub mod telemetry;
mod topology;

pub use config::BusConfig;
pub use dispatcher::{
    DispatchStats, Subscription, SubscriptionSpec, subscribe, subscribe_bincode, subscribe_json,
};
pub use error::{BusError, TopologyError};
pub use handler::{Handler, PublisherFn, PureFn, Verdict};
pub use publisher::Publisher;
pub use topology::{DeadLetterConfig, Durability, QueueBinding, Topology};

/// Connects to the broker named by `config.url`.
///
/// Only the in-process `memory://` scheme is built in; other transports
/// implement [`perilbus_broker::Connection`] and are used directly.
pub async fn connect(config: &BusConfig) -> Result<perilbus_broker::MemoryConnection, BusError> {
    let conn = perilbus_broker::connect(&config.url).await?;
    tracing::info!(
        url = %config.url,
        conn = %perilbus_broker::Connection::id(&conn),
        "connected to broker"
    );
    Ok(conn)
}

/// Common imports for bus users.
pub mod prelude {
    pub use crate::{
        BusConfig, BusError, DeadLetterConfig, Durability, Handler, Publisher, QueueBinding,
        Subscription, SubscriptionSpec, Topology, Verdict, subscribe, subscribe_bincode,
        subscribe_json,
    };
    pub use perilbus_codec::Format;
}
