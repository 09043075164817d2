//! Opaque payloads carried by exchange messages.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ErrCode, ErrInfo};

/// Byte payload exchanged between a client and a command handler.
///
/// The payload has no schema of its own; client and handler agree on an
/// encoding per command. JSON and MessagePack helpers cover the encodings
/// used by the built-in commands. On the wire the bytes travel as a base64
/// string.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ExchangeData(Vec<u8>);

impl ExchangeData {
    /// Returns an empty payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wraps raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Wraps UTF-8 text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into().into_bytes())
    }

    /// Encodes `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ErrCode::DataParse`] when serialisation fails.
    pub fn from_json<T>(value: &T) -> Result<Self, ErrInfo>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
            .map(Self)
            .map_err(|error| ErrCode::DataParse.info(format!("failed to encode payload: {error}")))
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ErrCode::DataParse`] when the payload is not valid JSON for
    /// `T`, including when it is empty.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, ErrInfo> {
        serde_json::from_slice(&self.0)
            .map_err(|error| ErrCode::DataParse.info(format!("failed to decode payload: {error}")))
    }

    /// Encodes `value` with the binary MessagePack schema encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ErrCode::DataParse`] when serialisation fails.
    pub fn from_msgpack<T>(value: &T) -> Result<Self, ErrInfo>
    where
        T: Serialize + ?Sized,
    {
        rmp_serde::to_vec_named(value)
            .map(Self)
            .map_err(|error| ErrCode::DataParse.info(format!("failed to encode payload: {error}")))
    }

    /// Decodes the payload as MessagePack.
    ///
    /// # Errors
    ///
    /// Returns [`ErrCode::DataParse`] when the payload does not decode as `T`.
    pub fn decode_msgpack<T: DeserializeOwned>(&self) -> Result<T, ErrInfo> {
        rmp_serde::from_slice(&self.0)
            .map_err(|error| ErrCode::DataParse.info(format!("failed to decode payload: {error}")))
    }

    /// Returns the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload as text when it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Consumes the payload, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ExchangeData {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) if text.len() <= 64 => write!(formatter, "ExchangeData({text:?})"),
            _ => write!(formatter, "ExchangeData(<{} bytes>)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for ExchangeData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for ExchangeData {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for ExchangeData {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl Serialize for ExchangeData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ExchangeData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Self)
            .map_err(de::Error::custom)
    }
}
