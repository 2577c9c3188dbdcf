//! Content-type tags carried on every message.
//!
//! Publishers stamp each message with the tag of the codec that produced
//! the payload, so a subscriber can refuse a payload it cannot read before
//! even trying to decode it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// Tag for the self-describing text codec.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Tag for the compact binary codec.
pub const CONTENT_TYPE_BINCODE: &str = "application/x-bincode";

/// Identifies the codec used to encode a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    /// `application/json`
    #[serde(rename = "application/json")]
    Json,
    /// `application/x-bincode`
    #[serde(rename = "application/x-bincode")]
    Bincode,
}

impl ContentType {
    /// Returns the wire string for this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => CONTENT_TYPE_JSON,
            Self::Bincode => CONTENT_TYPE_BINCODE,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CONTENT_TYPE_JSON => Ok(Self::Json),
            CONTENT_TYPE_BINCODE => Ok(Self::Bincode),
            other => Err(CodecError::UnsupportedContentType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parses_its_own_display() {
        for ct in [ContentType::Json, ContentType::Bincode] {
            let parsed: ContentType = ct.to_string().parse().unwrap();
            assert_eq!(parsed, ct);
        }
    }

    #[test]
    fn test_content_type_rejects_unknown_tag() {
        let err = "application/gob".parse::<ContentType>().unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedContentType(ref s) if s == "application/gob"));
    }

    #[test]
    fn test_content_type_serializes_as_wire_string() {
        let json = serde_json::to_string(&ContentType::Bincode).unwrap();
        assert_eq!(json, "\"application/x-bincode\"");
    }
}
