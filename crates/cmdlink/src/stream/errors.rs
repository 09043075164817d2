//! Transport failures surfaced by message streams.

use std::io;

use thiserror::Error;

use crate::error::{ErrCode, ErrInfo};

/// Errors raised while sending or receiving messages.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,
    /// The peer sent END where more data was expected.
    #[error("peer ended the exchange")]
    PeerEnded,
    /// The peer sent an ERROR where data was expected.
    #[error("peer reported an error: {0}")]
    UnexpectedError(ErrInfo),
    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {message}")]
    Codec {
        /// Description of the malformed input.
        message: String,
        /// Underlying serde failure, when there is one.
        #[source]
        source: Option<serde_json::Error>,
    },
    /// A frame exceeded the size limit.
    #[error("frame too large: {size} bytes exceeds {max_size} byte limit")]
    FrameTooLarge {
        /// Size of the offending frame in bytes.
        size: usize,
        /// Largest frame the stream accepts.
        max_size: usize,
    },
}

impl StreamError {
    /// Creates a codec error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Codec {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Returns true when the error means the connection is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Returns true when the error only reports that the exchange is over.
    #[must_use]
    pub fn ends_exchange(&self) -> bool {
        matches!(self, Self::PeerEnded) || self.is_disconnect()
    }

    /// Converts the failure into the structured form handed to callers.
    #[must_use]
    pub fn to_err_info(&self) -> ErrInfo {
        match self {
            Self::UnexpectedError(info) => info.clone(),
            other => ErrCode::Unknown.info(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::UnexpectedEof, true)]
    #[case(io::ErrorKind::BrokenPipe, true)]
    #[case(io::ErrorKind::ConnectionReset, true)]
    #[case(io::ErrorKind::TimedOut, false)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn classifies_io_disconnects(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        assert_eq!(StreamError::Io(io::Error::from(kind)).is_disconnect(), expected);
    }

    #[test]
    fn peer_end_is_not_a_disconnect() {
        assert!(!StreamError::PeerEnded.is_disconnect());
        assert!(StreamError::PeerEnded.ends_exchange());
    }

    #[test]
    fn unexpected_error_keeps_peer_info() {
        let info = ErrCode::Validation.info("bad");
        assert_eq!(StreamError::UnexpectedError(info.clone()).to_err_info(), info);
    }

    #[test]
    fn transport_errors_become_unknown_info() {
        let info = StreamError::Disconnected.to_err_info();
        assert_eq!(info.code(), ErrCode::Unknown);
        assert_eq!(info.message(), "peer disconnected");
    }
}
