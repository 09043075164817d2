//! Client-side exchange engine.
//!
//! An exchange sends a command name, waits for the acknowledgement, sends
//! the initial payload and then loops: receive from the peer, let the caller
//! react, send the reaction back. Either side may end the exchange. An ERROR
//! from the interceptor does not end it; the peer decides what happens next.
//!
//! The END sentinel is sent to the peer exactly once on every exit, including
//! a panic inside an interceptor, so the dispatcher's drain always finishes.

use std::ops::{Deref, DerefMut};

use tracing::{debug, trace};

use crate::command::CommandName;
use crate::data::ExchangeData;
use crate::error::{ErrCode, ErrInfo};
use crate::stream::{Message, MessageStream, StreamError, TrackedStream};

const EXCHANGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::exchange");

/// What an interceptor wants to happen after a message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send the payload as DATA, if any, and wait for the next message.
    Continue(Option<ExchangeData>),
    /// Send END carrying the payload and finish the exchange.
    End(ExchangeData),
    /// Send the error and wait for the peer's reaction.
    Error(ErrInfo),
}

/// How the exchange reacts to a transport failure while waiting for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportDecision {
    /// Return the failure to the caller.
    Stop,
    /// Keep waiting, after sending `reply` to the peer if given. A
    /// disconnect cannot be retried and is treated as [`Self::Stop`].
    Retry {
        /// Error sent to the peer before waiting again.
        reply: Option<ErrInfo>,
    },
    /// Return the last received payload (or an empty one) as a success.
    Complete,
}

/// Interceptor invoked for each DATA (`Ok`) or ERROR (`Err`) from the peer.
pub type MessageInterceptor<'f> = Box<dyn FnMut(Result<ExchangeData, ErrInfo>) -> Step + 'f>;

/// Classifier invoked with the last received payload and the failure.
pub type TransportInterceptor<'f> =
    Box<dyn FnMut(Option<&ExchangeData>, &StreamError) -> TransportDecision + 'f>;

/// States of the exchange machine, as reported in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Sending the command name.
    SendCommand,
    /// Waiting for the dispatcher's acknowledgement.
    AwaitAck,
    /// Sending the first payload.
    SendInitial,
    /// Waiting for the next peer message.
    AwaitMessage,
    /// Handing a peer message to the interceptor.
    RunInterceptor,
    /// Sending the interceptor's reaction.
    SendResponse,
    /// Discarding peer messages until its END.
    Drain,
    /// Finished.
    Done,
}

/// Builder and runner for one command exchange.
///
/// ```no_run
/// use std::net::TcpStream;
///
/// use cmdlink::{commands, Exchange, JsonLineStream, Step};
///
/// let mut stream = JsonLineStream::new(TcpStream::connect("127.0.0.1:9779")?);
/// let reply = Exchange::new(commands::HELLO).run(&mut stream)?;
/// assert_eq!(reply.as_text(), Some("pong"));
///
/// let mut rounds = 0;
/// Exchange::new(commands::SYSTEM_CALL)
///     .data(cmdlink::ExchangeData::from_text("uptime"))
///     .on_message(|message| {
///         rounds += 1;
///         match message {
///             Ok(_) if rounds < 3 => Step::Continue(None),
///             Ok(last) => Step::End(last),
///             Err(error) => Step::Error(error),
///         }
///     })
///     .run(&mut stream)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Exchange<'f> {
    command: CommandName,
    data: Option<ExchangeData>,
    on_message: Option<MessageInterceptor<'f>>,
    on_transport_error: Option<TransportInterceptor<'f>>,
}

impl<'f> Exchange<'f> {
    /// Starts building an exchange for `command`.
    #[must_use]
    pub fn new(command: impl Into<CommandName>) -> Self {
        Self {
            command: command.into(),
            data: None,
            on_message: None,
            on_transport_error: None,
        }
    }

    /// Sets the first payload the handler sees. Defaults to empty.
    #[must_use]
    pub fn data(mut self, data: ExchangeData) -> Self {
        self.data = Some(data);
        self
    }

    /// Installs the per-message interceptor.
    ///
    /// Without one, DATA messages are ignored, and the last peer ERROR is
    /// returned once the peer sends END. With one, a peer ERROR is returned
    /// at END only when the interceptor answered it with [`Step::Error`];
    /// any other answer means the interceptor handled it.
    #[must_use]
    pub fn on_message<F>(mut self, interceptor: F) -> Self
    where
        F: FnMut(Result<ExchangeData, ErrInfo>) -> Step + 'f,
    {
        self.on_message = Some(Box::new(interceptor));
        self
    }

    /// Installs the transport failure classifier.
    ///
    /// Without one, a failure drains the peer and is returned as an
    /// [`ErrInfo`].
    #[must_use]
    pub fn on_transport_error<F>(mut self, classifier: F) -> Self
    where
        F: FnMut(Option<&ExchangeData>, &StreamError) -> TransportDecision + 'f,
    {
        self.on_transport_error = Some(Box::new(classifier));
        self
    }

    /// Runs the exchange to completion on `stream`.
    ///
    /// # Errors
    ///
    /// Returns the peer's error, or an [`ErrInfo`] describing a transport
    /// failure. Transport failures never escape in any other form.
    pub fn run<S>(self, stream: &mut S) -> Result<ExchangeData, ErrInfo>
    where
        S: MessageStream + ?Sized,
    {
        let Self {
            command,
            data,
            mut on_message,
            mut on_transport_error,
        } = self;
        let mut initial = data;
        let mut session = EndGuard::new(stream);
        let mut last: Option<ExchangeData> = None;
        let mut peer_error: Option<ErrInfo> = None;
        let mut phase = Phase::SendCommand;

        loop {
            trace!(target: EXCHANGE_TARGET, %command, state = ?phase.state(), "exchange transition");
            phase = match phase {
                Phase::SendCommand => {
                    match session.send_data(&ExchangeData::from_text(command.as_str())) {
                        Ok(()) => Phase::AwaitAck,
                        Err(error) => Phase::Done(Err(error.to_err_info())),
                    }
                }
                Phase::AwaitAck => match session.receive() {
                    Ok(Message::Data(_)) => Phase::SendInitial,
                    Ok(Message::Error(error)) => {
                        debug!(target: EXCHANGE_TARGET, %command, %error, "command refused");
                        Phase::Drain(AfterDrain::Return(Err(error)))
                    }
                    Ok(Message::End(_)) => Phase::Drain(AfterDrain::Return(Err(ErrCode::Unknown
                        .info(format!("peer ended {command} before acknowledging it"))))),
                    Err(error) => Phase::Done(Err(error.to_err_info())),
                },
                Phase::SendInitial => {
                    match session.send_data(&initial.take().unwrap_or_default()) {
                        Ok(()) => Phase::AwaitMessage,
                        Err(error) => Phase::Done(Err(error.to_err_info())),
                    }
                }
                Phase::AwaitMessage => match session.receive() {
                    Ok(Message::End(payload)) => match peer_error.take() {
                        Some(error) => Phase::Done(Err(error)),
                        None => Phase::Done(Ok(payload)),
                    },
                    Ok(Message::Data(payload)) => {
                        last = Some(payload.clone());
                        if on_message.is_some() {
                            Phase::RunInterceptor(Ok(payload))
                        } else {
                            Phase::AwaitMessage
                        }
                    }
                    Ok(Message::Error(error)) => {
                        if on_message.is_some() {
                            Phase::RunInterceptor(Err(error))
                        } else {
                            debug!(target: EXCHANGE_TARGET, %command, %error, "peer reported an error");
                            peer_error = Some(error);
                            Phase::AwaitMessage
                        }
                    }
                    Err(error) => {
                        transport_failure(on_transport_error.as_mut(), last.as_ref(), &error)
                    }
                },
                Phase::RunInterceptor(message) => match on_message.as_mut() {
                    Some(interceptor) => {
                        let peer_failure = message.as_ref().err().cloned();
                        match interceptor(message) {
                            Step::Continue(None) => Phase::AwaitMessage,
                            Step::Continue(Some(payload)) => {
                                Phase::SendResponse(Message::Data(payload))
                            }
                            Step::Error(error) => {
                                if peer_failure.is_some() {
                                    peer_error = peer_failure;
                                }
                                Phase::SendResponse(Message::Error(error))
                            }
                            Step::End(payload) => Phase::SendResponse(Message::End(payload)),
                        }
                    }
                    None => Phase::AwaitMessage,
                },
                Phase::SendResponse(response) => {
                    let sent = match &response {
                        Message::Data(payload) => session.send_data(payload),
                        Message::Error(error) => session.send_error(error),
                        Message::End(payload) => session.finish(Some(payload)),
                    };
                    match (sent, response.is_end()) {
                        (Ok(()), true) => Phase::Drain(AfterDrain::PeerPayload),
                        (Ok(()), false) => Phase::AwaitMessage,
                        (Err(error), _) => Phase::Done(Err(error.to_err_info())),
                    }
                }
                Phase::Drain(after) => {
                    if let Err(error) = session.finish(None) {
                        debug!(target: EXCHANGE_TARGET, %command, %error, "failed to send END");
                    }
                    let peer_payload = session.drain().unwrap_or_else(|error| {
                        debug!(target: EXCHANGE_TARGET, %command, %error, "drain interrupted");
                        None
                    });
                    Phase::Done(after.resolve(peer_payload))
                }
                Phase::Done(result) => {
                    if let Err(error) = session.finish(None) {
                        debug!(target: EXCHANGE_TARGET, %command, %error, "failed to send END");
                    }
                    debug!(target: EXCHANGE_TARGET, %command, ok = result.is_ok(), "exchange finished");
                    return result;
                }
            };
        }
    }
}

enum Phase {
    SendCommand,
    AwaitAck,
    SendInitial,
    AwaitMessage,
    RunInterceptor(Result<ExchangeData, ErrInfo>),
    SendResponse(Message),
    Drain(AfterDrain),
    Done(Result<ExchangeData, ErrInfo>),
}

impl Phase {
    const fn state(&self) -> ExchangeState {
        match self {
            Self::SendCommand => ExchangeState::SendCommand,
            Self::AwaitAck => ExchangeState::AwaitAck,
            Self::SendInitial => ExchangeState::SendInitial,
            Self::AwaitMessage => ExchangeState::AwaitMessage,
            Self::RunInterceptor(_) => ExchangeState::RunInterceptor,
            Self::SendResponse(_) => ExchangeState::SendResponse,
            Self::Drain(_) => ExchangeState::Drain,
            Self::Done(_) => ExchangeState::Done,
        }
    }
}

/// What to return once the peer has been drained.
enum AfterDrain {
    /// The peer's final payload, or empty if it disconnected.
    PeerPayload,
    Return(Result<ExchangeData, ErrInfo>),
}

impl AfterDrain {
    fn resolve(self, peer_payload: Option<ExchangeData>) -> Result<ExchangeData, ErrInfo> {
        match self {
            Self::PeerPayload => Ok(peer_payload.unwrap_or_default()),
            Self::Return(result) => result,
        }
    }
}

fn transport_failure(
    classifier: Option<&mut TransportInterceptor<'_>>,
    last: Option<&ExchangeData>,
    error: &StreamError,
) -> Phase {
    let Some(classify) = classifier else {
        return Phase::Drain(AfterDrain::Return(Err(error.to_err_info())));
    };
    match classify(last, error) {
        TransportDecision::Stop => Phase::Done(Err(error.to_err_info())),
        TransportDecision::Complete => Phase::Done(Ok(last.cloned().unwrap_or_default())),
        TransportDecision::Retry { .. } if error.is_disconnect() => {
            Phase::Done(Err(error.to_err_info()))
        }
        TransportDecision::Retry { reply: Some(reply) } => {
            Phase::SendResponse(Message::Error(reply))
        }
        TransportDecision::Retry { reply: None } => Phase::AwaitMessage,
    }
}

/// Sends END when dropped unless it has already been sent.
struct EndGuard<'a, S: MessageStream + ?Sized> {
    stream: TrackedStream<'a, S>,
}

impl<'a, S: MessageStream + ?Sized> EndGuard<'a, S> {
    fn new(stream: &'a mut S) -> Self {
        Self {
            stream: TrackedStream::new(stream),
        }
    }

    fn finish(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError> {
        if self.stream.end_sent() {
            return Ok(());
        }
        self.stream.send_end(payload)
    }
}

impl<'a, S: MessageStream + ?Sized> Deref for EndGuard<'a, S> {
    type Target = TrackedStream<'a, S>;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<S: MessageStream + ?Sized> DerefMut for EndGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}

impl<S: MessageStream + ?Sized> Drop for EndGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(error) = self.finish(None) {
            debug!(target: EXCHANGE_TARGET, %error, "failed to send END during unwind");
        }
    }
}
