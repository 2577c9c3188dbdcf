//! Codec trait and implementations for serializing/deserializing payloads.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The bus doesn't care HOW a payload is serialized; it just needs
//! something that implements the [`Codec`] trait. Publishers and
//! subscribers pick their codec independently; a payload must be decoded
//! with the codec that encoded it.
//!
//! Two codecs are provided:
//! - [`JsonCodec`]: human-readable, self-describing.
//! - [`BincodeCodec`]: compact binary, framed with a magic marker.
//!
//! [`Format`] picks one of the two at runtime (from configuration).

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{CodecError, ContentType};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → the codec is shared by publishers and moved into
///   subscription tasks, which Tokio may run on any worker thread.
/// - `'static` → the codec owns everything it needs, so it can live
///   inside long-running dispatch loops.
///
/// The `encode`/`decode` methods are generic, so the trait is not object
/// safe. Call sites take a type parameter (`K: Codec`) instead of a
/// trait object; runtime selection goes through [`Format`].
pub trait Codec: Send + Sync + 'static {
    /// The tag stamped on payloads produced by this codec.
    fn content_type(&self) -> ContentType;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`CodecError::Encode`] if the value can't be represented in
    /// this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`CodecError::Decode`] or [`CodecError::BadFrame`] if the
    /// bytes are malformed, truncated, produced by another codec, or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is self-describing: you can read messages straight off the broker's
/// management UI. The tradeoff is size.
///
/// ## Example
///
/// ```rust
/// use perilbus_codec::{Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&vec![1u32, 2, 3]).unwrap();
/// assert_eq!(bytes, b"[1,2,3]");
///
/// let decoded: Vec<u32> = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, vec![1, 2, 3]);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn content_type(&self) -> ContentType {
        ContentType::Json
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            content_type: ContentType::Json,
            source: Box::new(e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Decode {
            content_type: ContentType::Json,
            source: Box::new(e),
        })
    }
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// Marker prepended to every bincode frame.
///
/// `0xB1` can never start valid UTF-8, so JSON decoders reject binary
/// frames outright, and JSON text never starts with this marker, so the
/// binary decoder rejects JSON payloads instead of misreading them.
#[cfg(feature = "bincode")]
pub const BINCODE_MAGIC: [u8; 2] = [0xB1, 0xC0];

/// Upper bound on a decoded bincode payload, in bytes.
#[cfg(feature = "bincode")]
pub const BINCODE_MAX_FRAME: u64 = 16 * 1024 * 1024;

/// A [`Codec`] that uses bincode (compact binary).
///
/// The bincode body uses variable-length integers and rejects trailing
/// bytes, so a truncated or padded frame is reported instead of decoded.
///
/// ```rust
/// use perilbus_codec::{BincodeCodec, Codec, BINCODE_MAGIC};
///
/// let codec = BincodeCodec;
/// let bytes = codec.encode(&(7u8, true)).unwrap();
/// assert_eq!(&bytes[..2], &BINCODE_MAGIC);
/// let back: (u8, bool) = codec.decode(&bytes).unwrap();
/// assert_eq!(back, (7, true));
/// ```
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "bincode")]
fn bincode_options() -> impl bincode::Options {
    use bincode::Options;

    bincode::DefaultOptions::new()
        .with_limit(BINCODE_MAX_FRAME)
        .reject_trailing_bytes()
}

#[cfg(feature = "bincode")]
impl Codec for BincodeCodec {
    fn content_type(&self) -> ContentType {
        ContentType::Bincode
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        use bincode::Options;

        let mut frame = BINCODE_MAGIC.to_vec();
        bincode_options()
            .serialize_into(&mut frame, value)
            .map_err(|e| CodecError::Encode {
                content_type: ContentType::Bincode,
                source: e,
            })?;
        Ok(frame)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        use bincode::Options;

        let body = data
            .strip_prefix(&BINCODE_MAGIC[..])
            .ok_or_else(|| CodecError::BadFrame {
                content_type: ContentType::Bincode,
                reason: "missing bincode frame marker".to_string(),
            })?;
        bincode_options()
            .deserialize(body)
            .map_err(|e| CodecError::Decode {
                content_type: ContentType::Bincode,
                source: e,
            })
    }
}

// ---------------------------------------------------------------------------
// Format: runtime codec selection
// ---------------------------------------------------------------------------

/// A codec chosen at runtime, e.g. from a configuration file.
///
/// Serializes as `"json"` / `"bincode"` so it reads naturally in TOML.
#[cfg(all(feature = "json", feature = "bincode"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// [`JsonCodec`]
    #[default]
    Json,
    /// [`BincodeCodec`]
    Bincode,
}

#[cfg(all(feature = "json", feature = "bincode"))]
impl From<ContentType> for Format {
    fn from(ct: ContentType) -> Self {
        match ct {
            ContentType::Json => Self::Json,
            ContentType::Bincode => Self::Bincode,
        }
    }
}

#[cfg(all(feature = "json", feature = "bincode"))]
impl Codec for Format {
    fn content_type(&self) -> ContentType {
        match self {
            Self::Json => ContentType::Json,
            Self::Bincode => ContentType::Bincode,
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => JsonCodec.encode(value),
            Self::Bincode => BincodeCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => JsonCodec.decode(data),
            Self::Bincode => BincodeCodec.decode(data),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(all(test, feature = "json", feature = "bincode"))]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pause {
        is_paused: bool,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Log {
        message: String,
        username: String,
        seq: u64,
    }

    fn sample_log() -> Log {
        Log {
            message: "alice won a war against bob".into(),
            username: "alice".into(),
            seq: 300,
        }
    }

    // =====================================================================
    // Round trips
    // =====================================================================

    #[test]
    fn test_json_round_trip() {
        let bytes = JsonCodec.encode(&sample_log()).unwrap();
        let back: Log = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(back, sample_log());
    }

    #[test]
    fn test_bincode_round_trip() {
        let bytes = BincodeCodec.encode(&sample_log()).unwrap();
        let back: Log = BincodeCodec.decode(&bytes).unwrap();
        assert_eq!(back, sample_log());
    }

    #[test]
    fn test_bincode_is_smaller_than_json() {
        let json = JsonCodec.encode(&sample_log()).unwrap();
        let bin = BincodeCodec.encode(&sample_log()).unwrap();
        assert!(bin.len() < json.len());
    }

    #[test]
    fn test_json_payload_is_readable_text() {
        let bytes = JsonCodec.encode(&Pause { is_paused: true }).unwrap();
        assert_eq!(bytes, br#"{"is_paused":true}"#);
    }

    // =====================================================================
    // Cross-codec payloads never decode
    // =====================================================================

    #[test]
    fn test_bincode_rejects_json_payload() {
        let bytes = JsonCodec.encode(&Pause { is_paused: true }).unwrap();
        let err = BincodeCodec.decode::<Pause>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::BadFrame { .. }));
        assert!(err.is_decode());
    }

    #[test]
    fn test_json_rejects_bincode_payload() {
        let bytes = BincodeCodec.encode(&Pause { is_paused: true }).unwrap();
        let err = JsonCodec.decode::<Pause>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Decode { content_type: ContentType::Json, .. }
        ));
    }

    // =====================================================================
    // Corruption
    // =====================================================================

    #[test]
    fn test_bincode_rejects_truncated_frame() {
        let bytes = BincodeCodec.encode(&sample_log()).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(BincodeCodec.decode::<Log>(truncated).is_err());
    }

    #[test]
    fn test_bincode_rejects_trailing_bytes() {
        let mut bytes = BincodeCodec.encode(&Pause { is_paused: false }).unwrap();
        bytes.push(0);
        let err = BincodeCodec.decode::<Pause>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn test_bincode_rejects_invalid_bool() {
        let mut bytes = BincodeCodec.encode(&Pause { is_paused: true }).unwrap();
        *bytes.last_mut().unwrap() = 7;
        assert!(BincodeCodec.decode::<Pause>(&bytes).is_err());
    }

    #[test]
    fn test_json_rejects_schema_mismatch() {
        let bytes = JsonCodec.encode(&Pause { is_paused: true }).unwrap();
        let err = JsonCodec.decode::<Log>(&bytes).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().starts_with("application/json decode failed"));
    }

    #[test]
    fn test_empty_payload_is_an_error_for_both() {
        assert!(JsonCodec.decode::<Pause>(&[]).is_err());
        assert!(BincodeCodec.decode::<Pause>(&[]).is_err());
    }

    // =====================================================================
    // Format
    // =====================================================================

    #[test]
    fn test_format_delegates_to_matching_codec() {
        let v = Pause { is_paused: true };
        assert_eq!(
            Format::Json.encode(&v).unwrap(),
            JsonCodec.encode(&v).unwrap()
        );
        assert_eq!(
            Format::Bincode.encode(&v).unwrap(),
            BincodeCodec.encode(&v).unwrap()
        );
        assert_eq!(Format::Bincode.content_type(), ContentType::Bincode);
    }

    #[test]
    fn test_format_from_content_type() {
        assert_eq!(Format::from(ContentType::Json), Format::Json);
        assert_eq!(Format::from(ContentType::Bincode), Format::Bincode);
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let f: Format = serde_json::from_str("\"bincode\"").unwrap();
        assert_eq!(f, Format::Bincode);
        assert_eq!(Format::default(), Format::Json);
    }
}
