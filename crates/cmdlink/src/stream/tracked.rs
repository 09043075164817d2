//! END bookkeeping for one command cycle.

use tracing::trace;

use super::{Message, MessageStream, STREAM_TARGET, StreamError};
use crate::data::ExchangeData;
use crate::error::ErrInfo;

/// Wraps a stream for the duration of one command and records END traffic.
///
/// Once the peer's END has been received, further receives fail with
/// [`StreamError::PeerEnded`] without touching the transport, so nothing
/// belonging to the next command is consumed by accident.
#[derive(Debug)]
pub struct TrackedStream<'a, S: ?Sized> {
    inner: &'a mut S,
    peer_ended: bool,
    end_sent: bool,
}

impl<'a, S: MessageStream + ?Sized> TrackedStream<'a, S> {
    /// Starts tracking a fresh command cycle on `inner`.
    pub const fn new(inner: &'a mut S) -> Self {
        Self {
            inner,
            peer_ended: false,
            end_sent: false,
        }
    }

    /// Returns true once the peer's END has been received.
    #[must_use]
    pub const fn peer_ended(&self) -> bool {
        self.peer_ended
    }

    /// Returns true once an END has been written to the peer.
    #[must_use]
    pub const fn end_sent(&self) -> bool {
        self.end_sent
    }

    /// Consumes and discards peer messages until its END arrives.
    ///
    /// Returns the payload carried by the peer's END, or `None` when the END
    /// had already been received or the peer disconnected instead.
    ///
    /// # Errors
    ///
    /// Returns transport errors other than a disconnect.
    pub fn drain(&mut self) -> Result<Option<ExchangeData>, StreamError> {
        while !self.peer_ended {
            match self.receive() {
                Ok(Message::End(payload)) => return Ok(Some(payload)),
                Ok(message) => {
                    trace!(target: STREAM_TARGET, kind = message.kind(), "discarding message while draining");
                }
                Err(error) if error.is_disconnect() => return Ok(None),
                Err(error) => return Err(error),
            }
        }
        Ok(None)
    }
}

impl<S: MessageStream + ?Sized> MessageStream for TrackedStream<'_, S> {
    fn send_data(&mut self, payload: &ExchangeData) -> Result<(), StreamError> {
        self.inner.send_data(payload)
    }

    fn send_error(&mut self, error: &ErrInfo) -> Result<(), StreamError> {
        self.inner.send_error(error)
    }

    fn send_end(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError> {
        self.inner.send_end(payload)?;
        self.end_sent = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<Message, StreamError> {
        if self.peer_ended {
            return Err(StreamError::PeerEnded);
        }
        let message = self.inner.receive()?;
        if message.is_end() {
            self.peer_ended = true;
        }
        Ok(message)
    }
}
