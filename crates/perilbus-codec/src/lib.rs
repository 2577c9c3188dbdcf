//! Payload codecs for the Peril message bus.
//!
//! This crate decides how a typed game event becomes the opaque byte
//! payload a broker stores, and back:
//!
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`BincodeCodec`],
//!   [`Format`]): the serialize/deserialize pair.
//! - **Content types** ([`ContentType`]): the tag stamped on each message
//!   naming the codec that produced it.
//! - **Errors** ([`CodecError`]): what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! ```text
//! Broker (bytes + content type) → Codec (typed event) → Handler
//! ```
//!
//! The codec layer knows nothing about exchanges, queues or delivery
//! acknowledgments.

mod codec;
mod content_type;
mod error;

pub use codec::Codec;
#[cfg(feature = "bincode")]
pub use codec::{BincodeCodec, BINCODE_MAGIC, BINCODE_MAX_FRAME};
#[cfg(all(feature = "json", feature = "bincode"))]
pub use codec::Format;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use content_type::{ContentType, CONTENT_TYPE_BINCODE, CONTENT_TYPE_JSON};
pub use error::{CodecError, SourceError};
