//! Message stream contract and its line-delimited JSON implementation.
//!
//! A message stream exchanges discrete tagged messages over one duplex
//! connection. The protocol core only needs four operations: send a DATA
//! message, send an ERROR message, send the END sentinel (optionally carrying
//! a final payload), and block for the next incoming message.

mod errors;
mod jsonl;
mod tracked;

use serde::Serialize;

pub use self::errors::StreamError;
pub use self::jsonl::{JsonLineStream, MAX_FRAME_BYTES};
pub use self::tracked::TrackedStream;

use crate::data::ExchangeData;
use crate::error::{CommandError, ErrInfo};

pub(crate) const STREAM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stream");

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Success-tagged payload.
    Data(ExchangeData),
    /// Structured error reported by the peer.
    Error(ErrInfo),
    /// END sentinel: the peer will send nothing further for this command.
    End(ExchangeData),
}

impl Message {
    /// Returns true for the END sentinel.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// Returns the wire tag of the message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Error(_) => "error",
            Self::End(_) => "end",
        }
    }
}

/// Duplex channel of tagged messages.
///
/// Implementations own framing. Every call blocks until the message is fully
/// written or fully read; a broken connection surfaces as a [`StreamError`].
pub trait MessageStream {
    /// Sends a DATA message.
    ///
    /// # Errors
    ///
    /// Returns an error when the message cannot be written.
    fn send_data(&mut self, payload: &ExchangeData) -> Result<(), StreamError>;

    /// Sends an ERROR message.
    ///
    /// # Errors
    ///
    /// Returns an error when the message cannot be written.
    fn send_error(&mut self, error: &ErrInfo) -> Result<(), StreamError>;

    /// Sends the END sentinel, optionally carrying a final payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the message cannot be written.
    fn send_end(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError>;

    /// Blocks until the next message arrives.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection breaks or a frame is malformed.
    fn receive(&mut self) -> Result<Message, StreamError>;
}

impl<T: MessageStream + ?Sized> MessageStream for &mut T {
    fn send_data(&mut self, payload: &ExchangeData) -> Result<(), StreamError> {
        (**self).send_data(payload)
    }

    fn send_error(&mut self, error: &ErrInfo) -> Result<(), StreamError> {
        (**self).send_error(error)
    }

    fn send_end(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError> {
        (**self).send_end(payload)
    }

    fn receive(&mut self) -> Result<Message, StreamError> {
        (**self).receive()
    }
}

/// Conveniences for handler code built on top of [`MessageStream`].
pub trait MessageStreamExt: MessageStream {
    /// Receives the next DATA payload.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::PeerEnded`] when the peer sends END and
    /// [`StreamError::UnexpectedError`] when it sends an ERROR.
    fn receive_data(&mut self) -> Result<ExchangeData, StreamError> {
        match self.receive()? {
            Message::Data(payload) => Ok(payload),
            Message::End(_) => Err(StreamError::PeerEnded),
            Message::Error(info) => Err(StreamError::UnexpectedError(info)),
        }
    }

    /// Encodes `value` as JSON and sends it as a DATA message.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or sending fails.
    fn send_json<T>(&mut self, value: &T) -> Result<(), CommandError>
    where
        T: Serialize + ?Sized,
    {
        let payload = ExchangeData::from_json(value)?;
        self.send_data(&payload)?;
        Ok(())
    }
}

impl<T: MessageStream + ?Sized> MessageStreamExt for T {}
