//! Error taxonomy shared by both ends of a connection.
//!
//! Every failure that crosses the wire is an [`ErrInfo`]: a numeric
//! [`ErrCode`], a human readable message, and an optional raw payload. Handler
//! code returns [`CommandError`], which the dispatcher translates into an
//! `ErrInfo` (or into normal completion when the failure merely reports that
//! the peer has gone away).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::data::ExchangeData;
use crate::stream::StreamError;

/// Classification of a failure reported across the wire.
///
/// The named variants form the closed taxonomy understood by every peer.
/// [`ErrCode::Other`] carries any code this build does not recognise so that
/// newer peers can introduce codes without breaking older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrCode {
    /// Unclassified failure, including faults caught from handlers.
    Unknown,
    /// The command name could not be read from the connection.
    ReadCommand,
    /// The command name is not present in the registry.
    CommandUndefined,
    /// A handler rejected the payload it was given.
    Validation,
    /// A handler failed internally.
    ServerInside,
    /// A payload could not be encoded or decoded.
    DataParse,
    /// A system call issued on behalf of the peer failed.
    SystemCall,
    /// A system call finished; used to terminate shell streams.
    SystemCallEnd,
    /// A code outside the known taxonomy.
    Other(u16),
}

impl ErrCode {
    /// Returns the numeric wire representation.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Unknown => 520,
            Self::ReadCommand => 400,
            Self::CommandUndefined => 404,
            Self::ServerInside => 500,
            Self::DataParse => 501,
            Self::Validation => 502,
            Self::SystemCall => 503,
            Self::SystemCallEnd => 601,
            Self::Other(code) => code,
        }
    }

    /// Maps a numeric wire code back onto the taxonomy.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            520 => Self::Unknown,
            400 => Self::ReadCommand,
            404 => Self::CommandUndefined,
            500 => Self::ServerInside,
            501 => Self::DataParse,
            502 => Self::Validation,
            503 => Self::SystemCall,
            601 => Self::SystemCallEnd,
            other => Self::Other(other),
        }
    }

    /// Builds an [`ErrInfo`] with this code and no raw payload.
    pub fn info(self, message: impl Into<String>) -> ErrInfo {
        ErrInfo::new(self, message)
    }

    /// Builds an [`ErrInfo`] carrying `data` encoded as JSON.
    ///
    /// The raw payload is dropped when `data` cannot be serialised; the code
    /// and message still describe the failure.
    pub fn info_with_data<T>(self, message: impl Into<String>, data: &T) -> ErrInfo
    where
        T: Serialize + ?Sized,
    {
        let info = ErrInfo::new(self, message);
        match ExchangeData::from_json(data) {
            Ok(raw) => info.with_raw(raw),
            Err(_) => info,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ReadCommand => "read_command",
            Self::CommandUndefined => "command_undefined",
            Self::Validation => "validation",
            Self::ServerInside => "server_inside",
            Self::DataParse => "data_parse",
            Self::SystemCall => "system_call",
            Self::SystemCallEnd => "system_call_end",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.as_u16(), self.name())
    }
}

impl Serialize for ErrCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

impl<'de> Deserialize<'de> for ErrCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u16::deserialize(deserializer).map(Self::from_u16)
    }
}

/// Structured error exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ErrInfo {
    /// Failure classification.
    pub code: ErrCode,
    /// Human readable description.
    pub message: String,
    /// Optional payload attached by the reporting side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<ExchangeData>,
}

impl ErrInfo {
    /// Creates an error without a raw payload.
    pub fn new(code: ErrCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            raw: None,
        }
    }

    /// Attaches a raw payload.
    #[must_use]
    pub fn with_raw(mut self, raw: ExchangeData) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> ErrCode {
        self.code
    }

    /// Returns the message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the raw payload, if one was attached.
    #[must_use]
    pub const fn raw(&self) -> Option<&ExchangeData> {
        self.raw.as_ref()
    }
}

/// Failure returned by a command handler.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Structured failure, forwarded to the peer unchanged.
    #[error(transparent)]
    Info(#[from] ErrInfo),
    /// Transport failure observed while the handler was exchanging rounds.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Unstructured failure; forwarded as [`ErrCode::Unknown`].
    #[error("{0}")]
    Other(String),
}

impl CommandError {
    /// Wraps any displayable failure as an unstructured error.
    pub fn other(error: impl fmt::Display) -> Self {
        Self::Other(error.to_string())
    }

    /// Classifies the failure for the wire.
    ///
    /// Structured errors pass through. A stream error reporting that the
    /// peer ended the exchange or disconnected means the command is over, so
    /// it completes normally. Everything else becomes [`ErrCode::Unknown`]
    /// with the original text.
    #[must_use]
    pub fn translate(self) -> Translation {
        match self {
            Self::Info(info) | Self::Stream(StreamError::UnexpectedError(info)) => {
                Translation::Failed(info)
            }
            Self::Stream(error) if error.ends_exchange() => Translation::Completed,
            Self::Stream(error) => Translation::Failed(ErrCode::Unknown.info(error.to_string())),
            Self::Other(message) => Translation::Failed(ErrCode::Unknown.info(message)),
        }
    }
}

/// Result of translating a [`CommandError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    /// The failure only reports that the exchange is over.
    Completed,
    /// The failure must be reported to the peer.
    Failed(ErrInfo),
}
