//! Miscellaneous common types shared by the challenge and proof codecs.

use std::fmt::Display;

use base64::{Engine, prelude::BASE64_STANDARD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::errors::Error;

/// Any JSON value.
pub type AnyJson = serde_json::Value;

/// The x402 protocol version spoken by Box3 proofs: `"x402Version": 1`.
///
/// ```
/// use serde::{Serialize, Deserialize};
/// use box3_core::types::X402V1;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct Versioned {
///     x402_version: X402V1,
/// }
///
/// let parsed: Versioned = serde_json::from_value(serde_json::json!({
///     "x402Version": 1,
/// })).unwrap();
/// assert_eq!(parsed.x402_version, X402V1);
///
/// let rejected = serde_json::from_value::<Versioned>(serde_json::json!({
///     "x402Version": 2,
/// }));
/// assert!(rejected.is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct X402V1;

impl Serialize for X402V1 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i8(1)
    }
}

impl<'de> Deserialize<'de> for X402V1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = i8::deserialize(deserializer)?;
        match v {
            1 => Ok(X402V1),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported X402 version {}; expected 1",
                v
            ))),
        }
    }
}

impl Display for X402V1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1")
    }
}

/// A base64-encoded JSON document carried in an HTTP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64EncodedHeader(pub String);

impl Base64EncodedHeader {
    /// Serialize `value` to JSON and base64-encode it.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Base64EncodedHeader(BASE64_STANDARD.encode(json)))
    }

    /// Decode the header back into a typed JSON document.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let decoded_bytes = BASE64_STANDARD.decode(self.0.trim())?;
        let json_str = String::from_utf8(decoded_bytes)?;
        Ok(serde_json::from_str(&json_str)?)
    }
}

impl Serialize for Base64EncodedHeader {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Base64EncodedHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Base64EncodedHeader(s))
    }
}

impl Display for Base64EncodedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_base64_header_decodes_what_it_encodes() {
        let value = json!({ "boxId": "BOX-8823", "paid": true });
        let header = Base64EncodedHeader::encode(&value).unwrap();
        assert!(!header.0.contains('{'));

        let decoded: AnyJson = header.decode().unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_base64_header_rejects_garbage() {
        let header = Base64EncodedHeader("not*base64".to_string());
        let result = header.decode::<AnyJson>();
        assert!(matches!(result, Err(Error::Base64DecodeError(_))));
    }
}
