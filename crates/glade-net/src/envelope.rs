//! Versioned message envelope.
//!
//! Every payload carried inside a frame is a postcard-encoded value prefixed
//! with a single protocol version byte:
//!
//! ```text
//! +-----------+--------------------------+
//! | version   |  postcard body           |
//! | (1 byte)  |                          |
//! +-----------+--------------------------+
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Current wire-protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Errors produced while decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload had no version byte.
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard failed to encode or decode the body.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Encode `value` into a versioned envelope.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    let body = postcard::to_allocvec(value)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a versioned envelope produced by [`encode`].
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, EnvelopeError> {
    let (&version, body) = data.split_first().ok_or(EnvelopeError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(EnvelopeError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Sample {
        Hello { name: String },
        Point(f64, f64),
    }

    #[test]
    fn test_version_byte_prefixed() {
        let bytes = encode(&Sample::Point(1.5, -2.0)).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        let decoded: Sample = decode(&bytes).unwrap();
        assert_eq!(decoded, Sample::Point(1.5, -2.0));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let result: Result<Sample, _> = decode(&[]);
        assert!(matches!(result, Err(EnvelopeError::EmptyPayload)));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = encode(&Sample::Hello {
            name: "ada".to_string(),
        })
        .unwrap();
        bytes[0] = 99;
        let result: Result<Sample, _> = decode(&bytes);
        assert!(matches!(result, Err(EnvelopeError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_truncated_body_is_postcard_error() {
        let bytes = encode(&Sample::Hello {
            name: "a long enough name".to_string(),
        })
        .unwrap();
        let result: Result<Sample, _> = decode(&bytes[..4]);
        assert!(matches!(result, Err(EnvelopeError::Postcard(_))));
    }
}
