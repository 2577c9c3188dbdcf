//! Handler contracts: what a subscription calls for each decoded event.
//!
//! A handler sees one decoded event at a time and answers with a
//! [`Verdict`]. There is no error channel: a handler that failed decides
//! whether the message should come back ([`Verdict::NackRequeue`]) or go
//! to the dead-letter exchange ([`Verdict::NackDiscard`]).
//!
//! Two shapes exist, chosen when the subscription is registered:
//!
//! - [`Handler::Pure`] only needs the event.
//! - [`Handler::WithPublisher`] also gets a [`Publisher`] to emit
//!   follow-up events, and runs asynchronously.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use perilbus_broker::Channel;

use crate::Publisher;

/// What to do with a delivery after its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Processed; remove the message for good.
    Ack,
    /// Not processed this time; put it back for redelivery.
    NackRequeue,
    /// Can never be processed; drop it or dead-letter it.
    NackDiscard,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::NackRequeue => write!(f, "nack-requeue"),
            Self::NackDiscard => write!(f, "nack-discard"),
        }
    }
}

/// A synchronous handler that only needs the event.
pub type PureFn<T> = Box<dyn FnMut(T) -> Verdict + Send>;

/// An asynchronous handler that can publish follow-up events.
pub type PublisherFn<T, Ch> =
    Box<dyn FnMut(T, Publisher<Ch>) -> BoxFuture<'static, Verdict> + Send>;

/// A subscription's handler, for events of type `T` published over
/// channels of type `Ch`.
///
/// # Example
///
/// ```rust
/// use perilbus::{Handler, Verdict};
/// use perilbus_broker::MemoryChannel;
///
/// let pause: Handler<bool, MemoryChannel> = Handler::pure(|paused| {
///     println!("paused: {paused}");
///     Verdict::Ack
/// });
/// assert!(!pause.needs_publisher());
/// ```
pub enum Handler<T, Ch: Channel> {
    /// Called with the event only.
    Pure(PureFn<T>),
    /// Called with the event and a publisher; awaited.
    WithPublisher(PublisherFn<T, Ch>),
}

impl<T, Ch: Channel> Handler<T, Ch> {
    /// Wraps a synchronous handler.
    pub fn pure<F>(f: F) -> Self
    where
        F: FnMut(T) -> Verdict + Send + 'static,
    {
        Self::Pure(Box::new(f))
    }

    /// Wraps an asynchronous, publisher-aware handler.
    pub fn with_publisher<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(T, Publisher<Ch>) -> Fut + Send + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        Self::WithPublisher(Box::new(move |event, publisher| f(event, publisher).boxed()))
    }

    /// Returns `true` if the subscription must open a publisher for this
    /// handler.
    pub fn needs_publisher(&self) -> bool {
        matches!(self, Self::WithPublisher(_))
    }

    /// Runs the handler on one event.
    ///
    /// A publisher-aware handler with no publisher cannot run; the event is
    /// requeued.
    pub(crate) async fn call(&mut self, event: T, publisher: Option<&Publisher<Ch>>) -> Verdict {
        match (self, publisher) {
            (Self::Pure(f), _) => f(event),
            (Self::WithPublisher(f), Some(publisher)) => f(event, publisher.clone()).await,
            (Self::WithPublisher(_), None) => {
                tracing::error!("publisher-aware handler invoked without a publisher");
                Verdict::NackRequeue
            }
        }
    }
}

impl<T, Ch: Channel> std::fmt::Debug for Handler<T, Ch> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pure(_) => f.write_str("Handler::Pure"),
            Self::WithPublisher(_) => f.write_str("Handler::WithPublisher"),
        }
    }
}
