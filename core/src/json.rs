//! JSON codec for request and response payloads.
//!
//! Encoding happens on the calling thread before anything is submitted;
//! decoding happens on whichever thread the transport completes on.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Failure to turn bytes into a JSON value, or a value into bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value has no JSON representation (non-string map keys, a
    /// `Serialize` impl that refuses, and so on).
    #[error("value is not representable as JSON: {0}")]
    NotRepresentable(#[source] serde_json::Error),

    /// The body is not well-formed JSON.
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A body was required but the response carried none.
    #[error("response body is empty")]
    EmptyBody,
}

/// Serialize `value` into a request body.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(CodecError::NotRepresentable)
}

/// Parse a response body. Top-level fragments such as `"hello"` or `42` are
/// accepted.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::EmptyBody);
    }
    serde_json::from_slice(bytes).map_err(CodecError::Malformed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::ser::Error as _;
    use serde_json::json;

    use super::*;

    struct Refuses;

    impl Serialize for Refuses {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cycle detected"))
        }
    }

    #[test]
    fn encode_mapping() {
        let bytes = encode(&json!({ "name": "michael" })).unwrap();
        assert_eq!(bytes, br#"{"name":"michael"}"#);
    }

    #[test]
    fn encode_rejects_non_string_keys() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        assert!(matches!(encode(&map), Err(CodecError::NotRepresentable(_))));
    }

    #[test]
    fn encode_rejects_refusing_serializer() {
        let err = encode(&Refuses).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn decode_accepts_fragments() {
        assert_eq!(decode(br#""hello michael""#).unwrap(), json!("hello michael"));
        assert_eq!(decode(b"42").unwrap(), json!(42));
    }

    #[test]
    fn decode_preserves_array_order() {
        let value = decode(br#"[{"id":3},{"id":1},{"id":2}]"#).unwrap();
        let ids: Vec<i64> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn decode_empty_body() {
        assert!(matches!(decode(b""), Err(CodecError::EmptyBody)));
        assert!(matches!(decode(b"  \n"), Err(CodecError::EmptyBody)));
    }

    #[test]
    fn decode_malformed_body() {
        assert!(matches!(decode(b"{not json"), Err(CodecError::Malformed(_))));
    }
}
