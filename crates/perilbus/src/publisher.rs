//! Typed publishing over a dedicated channel.

use std::sync::Arc;

use perilbus_broker::{Channel, Connection, OutboundMessage};
use perilbus_codec::{BincodeCodec, Codec, Format, JsonCodec};
use serde::Serialize;

use crate::BusError;

/// Encodes typed values and publishes them to an exchange.
///
/// A publisher owns its own channel, so a slow consumer on another channel
/// never stalls it. Clones share that channel; the channel closes when the
/// last clone drops.
///
/// Publishing never retries. A failed publish is returned to the caller,
/// who decides whether to retry (inside a handler: return
/// [`Verdict::NackRequeue`](crate::Verdict::NackRequeue) so the inbound
/// message comes back and the whole reaction is redone).
pub struct Publisher<Ch: Channel> {
    channel: Arc<Ch>,
    format: Format,
}

impl<Ch: Channel> Clone for Publisher<Ch> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            format: self.format,
        }
    }
}

impl<Ch: Channel> std::fmt::Debug for Publisher<Ch> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("channel", &self.channel.id())
            .field("format", &self.format)
            .finish()
    }
}

impl<Ch: Channel> Publisher<Ch> {
    /// Wraps an already open channel. `format` is used by
    /// [`publish`](Self::publish).
    pub fn new(channel: Ch, format: Format) -> Self {
        Self {
            channel: Arc::new(channel),
            format,
        }
    }

    /// Opens a fresh channel on `conn` for publishing.
    pub async fn open<C>(conn: &C, format: Format) -> Result<Self, BusError>
    where
        C: Connection<Channel = Ch>,
    {
        let channel = conn.open_channel().await?;
        Ok(Self::new(channel, format))
    }

    /// The default format of this publisher.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Publishes `value` with this publisher's default format.
    pub async fn publish<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), BusError>
    where
        T: Serialize + Sync,
    {
        self.publish_with(&self.format, exchange, routing_key, value)
            .await
    }

    /// Publishes `value` as JSON.
    pub async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), BusError>
    where
        T: Serialize + Sync,
    {
        self.publish_with(&JsonCodec, exchange, routing_key, value)
            .await
    }

    /// Publishes `value` as bincode.
    pub async fn publish_bincode<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), BusError>
    where
        T: Serialize + Sync,
    {
        self.publish_with(&BincodeCodec, exchange, routing_key, value)
            .await
    }

    /// Publishes `value` encoded with `codec`, tagged with the codec's
    /// content type. Completes once the broker has accepted the message.
    pub async fn publish_with<K, T>(
        &self,
        codec: &K,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), BusError>
    where
        K: Codec,
        T: Serialize + Sync,
    {
        let content_type = codec.content_type();
        let payload = codec.encode(value)?;
        let size = payload.len();
        self.channel
            .publish(
                exchange,
                routing_key,
                OutboundMessage::new(payload, content_type.as_str()),
            )
            .await
            .inspect_err(|e| {
                tracing::warn!(%exchange, %routing_key, error = %e, "publish failed");
            })?;
        tracing::debug!(%exchange, %routing_key, %content_type, size, "published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use perilbus_broker::{ConsumeOptions, ExchangeKind, ExchangeSpec, MemoryBroker, QueueSpec};
    use perilbus_codec::{CONTENT_TYPE_BINCODE, CONTENT_TYPE_JSON};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn test_publish_tags_content_type() {
        let broker = MemoryBroker::start("publisher");
        let conn = broker.connect().await.unwrap();
        let ch = conn.open_channel().await.unwrap();
        ch.declare_exchange(&ExchangeSpec::durable("ex", ExchangeKind::Topic))
            .await
            .unwrap();
        ch.declare_queue(&QueueSpec {
            name: "q".into(),
            durable: true,
            ..Default::default()
        })
        .await
        .unwrap();
        ch.bind_queue("q", "ex", "#").await.unwrap();
        let mut consumer = ch.consume("q", ConsumeOptions::default()).await.unwrap();

        let publisher = Publisher::open(&conn, Format::Json).await.unwrap();
        publisher.publish("ex", "a", &Ping { n: 1 }).await.unwrap();
        publisher.publish_bincode("ex", "b", &Ping { n: 2 }).await.unwrap();

        let d = consumer.next().await.unwrap();
        assert_eq!(d.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
        assert_eq!(JsonCodec.decode::<Ping>(&d.payload).unwrap(), Ping { n: 1 });

        let d = consumer.next().await.unwrap();
        assert_eq!(d.content_type.as_deref(), Some(CONTENT_TYPE_BINCODE));
        assert_eq!(BincodeCodec.decode::<Ping>(&d.payload).unwrap(), Ping { n: 2 });
    }

    #[tokio::test]
    async fn test_publish_to_missing_exchange_reports_error() {
        let broker = MemoryBroker::start("publisher");
        let conn = broker.connect().await.unwrap();
        let publisher = Publisher::open(&conn, Format::Json).await.unwrap();

        let err = publisher
            .publish("missing", "k", &Ping { n: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Broker(_)));
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let broker = MemoryBroker::start("publisher");
        let conn = broker.connect().await.unwrap();
        let publisher = Publisher::open(&conn, Format::Bincode).await.unwrap();
        let clone = publisher.clone();
        assert_eq!(publisher.channel.id(), clone.channel.id());
        assert_eq!(clone.format(), Format::Bincode);
    }
}
