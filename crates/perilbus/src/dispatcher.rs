//! Subscription dispatcher: one Tokio task per subscription.
//!
//! For every delivery the task runs the same small state machine:
//!
//! ```text
//! Received → Decoding ─┬─ decode failed ──────────────────────→ NackDiscard
//!                      └─ decoded → handler → Verdict ─┬─ Ack ─→ ack
//!                                                      ├─ NackRequeue → nack(requeue)
//!                                                      └─ NackDiscard → nack(discard)
//! ```
//!
//! A payload that fails to decode will fail again on every redelivery, so
//! it is discarded (and dead-lettered if the queue has a dead-letter
//! exchange) instead of being left unacknowledged.
//!
//! The task owns its consume channel and, for publisher-aware handlers, its
//! publishing channel. It ends when the delivery stream closes, i.e. when
//! the channel or the connection shuts down; there is no per-subscription
//! cancel.

use perilbus_broker::{Channel, ConsumeOptions, Connection, Consumer, Delivery, DeliveryTag};
use perilbus_codec::{Codec, CodecError, Format};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::{BusConfig, BusError, Handler, Publisher, QueueBinding, Topology, Verdict};

// ---------------------------------------------------------------------------
// SubscriptionSpec
// ---------------------------------------------------------------------------

/// Everything needed to start a subscription besides its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Queue to declare and bind before consuming.
    pub binding: QueueBinding,
    /// Format inbound payloads are decoded with.
    pub format: Format,
    /// Default format of the publisher handed to publisher-aware handlers.
    pub publish_format: Format,
    /// Maximum unacknowledged deliveries held at once (0 = unlimited).
    pub prefetch: u16,
}

impl SubscriptionSpec {
    /// JSON in and out, prefetch of
    /// [`DEFAULT_PREFETCH`](crate::config::DEFAULT_PREFETCH).
    pub fn new(binding: QueueBinding) -> Self {
        Self {
            binding,
            format: Format::Json,
            publish_format: Format::Json,
            prefetch: crate::config::DEFAULT_PREFETCH,
        }
    }

    /// Takes prefetch, publish format and (if the binding has none) the
    /// dead-letter exchange from `config`.
    pub fn from_config(binding: QueueBinding, config: &BusConfig) -> Self {
        let binding = match binding.dead_letter {
            Some(_) => binding,
            None => binding.dead_letter_opt(config.dead_letter_exchange.as_deref()),
        };
        Self {
            binding,
            format: config.default_format,
            publish_format: config.default_format,
            prefetch: config.prefetch,
        }
    }

    /// Sets the inbound format.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Sets the publisher's default format.
    pub fn publish_format(mut self, format: Format) -> Self {
        self.publish_format = format;
        self
    }

    /// Sets the prefetch count.
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Counters reported by a subscription when its task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Deliveries taken off the stream.
    pub received: u64,
    /// Deliveries acknowledged.
    pub acked: u64,
    /// Deliveries nacked with requeue.
    pub requeued: u64,
    /// Deliveries nacked without requeue (handler verdicts and decode
    /// failures).
    pub discarded: u64,
    /// Deliveries whose payload could not be decoded.
    pub decode_failures: u64,
}

impl DispatchStats {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Ack => self.acked += 1,
            Verdict::NackRequeue => self.requeued += 1,
            Verdict::NackDiscard => self.discarded += 1,
        }
    }
}

/// A running subscription.
///
/// Dropping the handle does not stop the task; the subscription lives as
/// long as its connection. Await [`finished`](Self::finished) to collect
/// its counters after the connection closed.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    task: JoinHandle<DispatchStats>,
}

impl Subscription {
    /// The consumed queue (the broker-generated name if none was given).
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns `true` once the delivery stream has closed and the task has
    /// exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the task to end and returns its counters.
    pub async fn finished(self) -> Result<DispatchStats, BusError> {
        Ok(self.task.await?)
    }
}

// ---------------------------------------------------------------------------
// subscribe
// ---------------------------------------------------------------------------

/// Declares and binds the queue, opens a consumer, and spawns the dispatch
/// task.
///
/// Fails (and spawns nothing) if declaration, binding, opening the
/// publisher, or starting the consumer fails.
pub async fn subscribe<C, T>(
    topology: &Topology<'_, C>,
    spec: SubscriptionSpec,
    handler: Handler<T, C::Channel>,
) -> Result<Subscription, BusError>
where
    C: Connection,
    T: DeserializeOwned + Send + 'static,
{
    let (channel, info) = topology.declare_and_bind(&spec.binding).await?;

    let publisher = if handler.needs_publisher() {
        Some(Publisher::open(topology.connection(), spec.publish_format).await?)
    } else {
        None
    };

    let consumer = channel
        .consume(&info.name, ConsumeOptions::with_prefetch(spec.prefetch))
        .await?;

    tracing::info!(
        queue = %info.name,
        consumer = %consumer.tag(),
        format = ?spec.format,
        prefetch = spec.prefetch,
        handler = ?handler,
        "subscription started"
    );

    let worker = Worker {
        queue: info.name.clone(),
        channel,
        consumer,
        codec: spec.format,
        handler,
        publisher,
    };
    let task = tokio::spawn(worker.run());

    Ok(Subscription {
        queue: info.name,
        task,
    })
}

/// [`subscribe`] with JSON payloads and default prefetch.
pub async fn subscribe_json<C, T>(
    topology: &Topology<'_, C>,
    binding: QueueBinding,
    handler: Handler<T, C::Channel>,
) -> Result<Subscription, BusError>
where
    C: Connection,
    T: DeserializeOwned + Send + 'static,
{
    subscribe(topology, SubscriptionSpec::new(binding).format(Format::Json), handler).await
}

/// [`subscribe`] with bincode payloads and default prefetch.
pub async fn subscribe_bincode<C, T>(
    topology: &Topology<'_, C>,
    binding: QueueBinding,
    handler: Handler<T, C::Channel>,
) -> Result<Subscription, BusError>
where
    C: Connection,
    T: DeserializeOwned + Send + 'static,
{
    subscribe(topology, SubscriptionSpec::new(binding).format(Format::Bincode), handler).await
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// The dispatch loop's state, moved into its task.
struct Worker<T, Ch: Channel> {
    queue: String,
    channel: Ch,
    consumer: Consumer,
    codec: Format,
    handler: Handler<T, Ch>,
    publisher: Option<Publisher<Ch>>,
}

impl<T, Ch> Worker<T, Ch>
where
    T: DeserializeOwned + Send + 'static,
    Ch: Channel,
{
    async fn run(mut self) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some(delivery) = self.consumer.next().await {
            stats.received += 1;
            let tag = delivery.delivery_tag;

            let verdict = match self.decode(&delivery) {
                Ok(event) => self.handler.call(event, self.publisher.as_ref()).await,
                Err(e) => {
                    stats.decode_failures += 1;
                    tracing::warn!(
                        queue = %self.queue,
                        delivery_tag = %tag,
                        routing_key = %delivery.routing_key,
                        error = %e,
                        "undecodable message, discarding"
                    );
                    Verdict::NackDiscard
                }
            };

            tracing::debug!(
                queue = %self.queue,
                delivery_tag = %tag,
                routing_key = %delivery.routing_key,
                redelivered = delivery.redelivered,
                %verdict,
                "message handled"
            );

            if let Err(e) = settle(&self.channel, tag, verdict).await {
                tracing::error!(
                    queue = %self.queue,
                    delivery_tag = %tag,
                    %verdict,
                    error = %e,
                    "failed to settle delivery, stopping subscription"
                );
                break;
            }
            stats.record(verdict);
        }

        let _ = self.channel.close().await;
        tracing::info!(
            queue = %self.queue,
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            discarded = stats.discarded,
            "subscription stopped"
        );
        stats
    }

    /// Decodes a payload with the subscription's codec, refusing payloads
    /// tagged with another codec's content type.
    fn decode(&self, delivery: &Delivery) -> Result<T, CodecError> {
        let expected = self.codec.content_type();
        match delivery.content_type.as_deref() {
            Some(ct) if ct != expected.as_str() => {
                Err(CodecError::UnsupportedContentType(ct.to_string()))
            }
            _ => self.codec.decode(&delivery.payload),
        }
    }
}

/// Applies a verdict to the delivery.
async fn settle<Ch: Channel>(
    channel: &Ch,
    tag: DeliveryTag,
    verdict: Verdict,
) -> Result<(), BusError> {
    match verdict {
        Verdict::Ack => channel.ack(tag).await?,
        Verdict::NackRequeue => channel.nack(tag, true).await?,
        Verdict::NackDiscard => channel.nack(tag, false).await?,
    }
    Ok(())
}
