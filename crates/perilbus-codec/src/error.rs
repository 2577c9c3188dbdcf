//! Error types for the codec layer.
//!
//! Codec errors are always local to one message. The dispatcher decides
//! what happens to the delivery; the codec only reports what went wrong.

use crate::ContentType;

/// Boxed error from the underlying serialization library.
///
/// Each codec wraps a different library error (`serde_json::Error`,
/// `bincode::Error`). Boxing them keeps `CodecError` independent of
/// which codec features are compiled in.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("{content_type} encode failed: {source}")]
    Encode {
        /// The codec that failed.
        content_type: ContentType,
        /// The library error.
        #[source]
        source: SourceError,
    },

    /// Deserialization failed: malformed bytes, truncated input or a
    /// schema mismatch between publisher and subscriber.
    #[error("{content_type} decode failed: {source}")]
    Decode {
        /// The codec that failed.
        content_type: ContentType,
        /// The library error.
        #[source]
        source: SourceError,
    },

    /// The payload is not framed the way this codec frames its output.
    ///
    /// Typically a payload produced by the other codec.
    #[error("{content_type} frame rejected: {reason}")]
    BadFrame {
        /// The codec that rejected the frame.
        content_type: ContentType,
        /// Why the frame was rejected.
        reason: String,
    },

    /// A content-type tag that names no known codec.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl CodecError {
    /// Returns `true` for failures on the decoding side.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::BadFrame { .. })
    }
}
