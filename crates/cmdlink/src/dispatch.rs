//! Server-side command routing.
//!
//! The dispatcher owns one command cycle on a connection: it reads the
//! command name, resolves the handler, acknowledges, runs the handler behind
//! a panic boundary, and then drives the connection to a state where both
//! sides have exchanged END. Every exit path ends the same way, so the next
//! read on the connection always starts at a command name.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::CommandName;
use crate::data::ExchangeData;
use crate::error::{ErrCode, ErrInfo, Translation};
use crate::registry::{CommandContext, CommandRegistry};
use crate::stream::{Message, MessageStream, StreamError, TrackedStream};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// How one dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler returned a payload, or ended because the peer did.
    Completed(CommandName),
    /// The command failed and the peer received the error.
    ///
    /// The error comes from the handler, from the peer in place of the
    /// initial payload, or from a payload that could not be framed.
    Failed {
        /// Command that failed.
        command: CommandName,
        /// Error reported to the peer.
        error: ErrInfo,
    },
    /// No handler is registered under the requested name.
    Undefined(CommandName),
    /// The handler panicked; the peer received an `Unknown` error.
    Panicked {
        /// Command whose handler panicked.
        command: CommandName,
        /// Error reported to the peer.
        error: ErrInfo,
    },
    /// The first message was not a usable command name. The peer was told
    /// and the connection is still in sync.
    Rejected(ErrInfo),
    /// Reading the command name failed. Nothing was sent to the peer.
    ReadFailed(ErrInfo),
    /// The transport broke after the command was read.
    Aborted {
        /// Command in progress when the transport failed.
        command: CommandName,
        /// Transport failure, in wire form.
        error: ErrInfo,
    },
    /// The peer closed the connection between commands.
    Disconnected,
}

impl DispatchOutcome {
    /// Returns true when another command may be read from the connection.
    #[must_use]
    pub const fn keeps_connection(&self) -> bool {
        !matches!(
            self,
            Self::ReadFailed(_) | Self::Aborted { .. } | Self::Disconnected
        )
    }
}

/// Routes commands from a message stream to registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    /// Creates a dispatcher over a shared registry.
    #[must_use]
    pub const fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry the dispatcher resolves against.
    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Runs commands from `stream` until the peer disconnects or the
    /// connection breaks. Returns the number of commands dispatched.
    pub fn serve<S>(&self, stream: &mut S, peer: Option<&str>) -> usize
    where
        S: MessageStream + ?Sized,
    {
        let mut dispatched = 0;
        loop {
            let outcome = self.dispatch(stream, peer);
            if matches!(outcome, DispatchOutcome::Disconnected) {
                debug!(target: DISPATCH_TARGET, dispatched, "peer disconnected");
                return dispatched;
            }
            dispatched += 1;
            if !outcome.keeps_connection() {
                debug!(target: DISPATCH_TARGET, dispatched, "closing connection");
                return dispatched;
            }
        }
    }

    /// Runs one command cycle on `stream`.
    pub fn dispatch<S>(&self, stream: &mut S, peer: Option<&str>) -> DispatchOutcome
    where
        S: MessageStream + ?Sized,
    {
        let mut session = TrackedStream::new(stream);

        let command = match read_command(&mut session) {
            Ok(command) => command,
            Err(Rejection::Disconnected) => return DispatchOutcome::Disconnected,
            Err(Rejection::Transport(error)) => {
                let info = ErrCode::ReadCommand.info(format!("failed to read command: {error}"));
                warn!(target: DISPATCH_TARGET, %error, "failed to read command");
                return DispatchOutcome::ReadFailed(info);
            }
            Err(Rejection::Invalid(info)) => {
                warn!(target: DISPATCH_TARGET, error = %info, "rejecting command");
                if let Err(error) = session.send_error(&info) {
                    return aborted(CommandName::new(""), &error);
                }
                return finish(&mut session, DispatchOutcome::Rejected(info));
            }
        };

        debug!(target: DISPATCH_TARGET, %command, peer, "dispatching command");

        let Some(handler) = self.registry.resolve(command.as_str()) else {
            let info = ErrCode::CommandUndefined.info(format!("command {command} is not defined"));
            debug!(target: DISPATCH_TARGET, %command, "command not defined");
            if let Err(error) = session.send_error(&info) {
                return aborted(command, &error);
            }
            return finish(&mut session, DispatchOutcome::Undefined(command));
        };

        if let Err(error) = session.send_data(&ExchangeData::empty()) {
            return aborted(command, &error);
        }

        let initial = match session.receive() {
            Ok(Message::Data(payload) | Message::End(payload)) => payload,
            Ok(Message::Error(error)) => {
                debug!(target: DISPATCH_TARGET, %command, %error, "peer failed before the handler ran");
                return finish(&mut session, DispatchOutcome::Failed { command, error });
            }
            Err(error) if error.is_disconnect() => return DispatchOutcome::Disconnected,
            Err(error @ (StreamError::Codec { .. } | StreamError::FrameTooLarge { .. })) => {
                // The offending frame has been consumed; the stream is still in sync.
                let info =
                    ErrCode::DataParse.info(format!("failed to read initial payload: {error}"));
                debug!(target: DISPATCH_TARGET, %command, %error, "initial payload rejected");
                if let Err(send_error) = session.send_error(&info) {
                    return aborted(command, &send_error);
                }
                return finish(&mut session, DispatchOutcome::Failed { command, error: info });
            }
            Err(error) => return aborted(command, &error),
        };

        let context = CommandContext::new(command.clone(), initial, peer.map(str::to_owned));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&mut session, &context)
        }));

        let outcome = match result {
            Ok(Ok(payload)) => match deliver(&mut session, &payload) {
                Ok(()) => {
                    debug!(target: DISPATCH_TARGET, %command, "command completed");
                    DispatchOutcome::Completed(command)
                }
                Err(StreamError::FrameTooLarge { size, max_size }) => {
                    let error = ErrCode::ServerInside.info(format!(
                        "reply of {size} bytes exceeds the {max_size} byte frame limit"
                    ));
                    warn!(target: DISPATCH_TARGET, %command, %error, "reply not sent");
                    if let Err(send_error) = report(&mut session, &error) {
                        return aborted(command, &send_error);
                    }
                    DispatchOutcome::Failed { command, error }
                }
                Err(error) => return aborted(command, &error),
            },
            Ok(Err(failure)) => match failure.translate() {
                Translation::Completed => {
                    debug!(target: DISPATCH_TARGET, %command, "command ended by peer");
                    DispatchOutcome::Completed(command)
                }
                Translation::Failed(error) => {
                    debug!(target: DISPATCH_TARGET, %command, %error, "command failed");
                    if let Err(send_error) = report(&mut session, &error) {
                        return aborted(command, &send_error);
                    }
                    DispatchOutcome::Failed { command, error }
                }
            },
            Err(payload) => {
                let error = ErrCode::Unknown.info(format!(
                    "command handler panicked: {}",
                    panic_message(payload.as_ref())
                ));
                warn!(target: DISPATCH_TARGET, %command, %error, "command handler panicked");
                if let Err(send_error) = report(&mut session, &error) {
                    return aborted(command, &send_error);
                }
                DispatchOutcome::Panicked { command, error }
            }
        };

        finish(&mut session, outcome)
    }
}

enum Rejection {
    Disconnected,
    Transport(StreamError),
    Invalid(ErrInfo),
}

fn read_command<S>(session: &mut TrackedStream<'_, S>) -> Result<CommandName, Rejection>
where
    S: MessageStream + ?Sized,
{
    match session.receive() {
        Ok(Message::Data(payload)) => String::from_utf8(payload.into_bytes())
            .map(CommandName::new)
            .map_err(|_| Rejection::Invalid(ErrCode::ReadCommand.info("command name is not valid UTF-8"))),
        Ok(message) => Err(Rejection::Invalid(ErrCode::ReadCommand.info(format!(
            "expected a command name, received {}",
            message.kind()
        )))),
        Err(error) if error.is_disconnect() => Err(Rejection::Disconnected),
        Err(error) => Err(Rejection::Transport(error)),
    }
}

/// Sends the handler's payload on END unless the handler already ended the
/// exchange itself. An oversized payload is not written, so the caller may
/// still report it.
fn deliver<S>(session: &mut TrackedStream<'_, S>, payload: &ExchangeData) -> Result<(), StreamError>
where
    S: MessageStream + ?Sized,
{
    if session.end_sent() {
        return Ok(());
    }
    session.send_end(Some(payload))
}

/// Sends `error` unless the handler already ended the exchange.
fn report<S>(session: &mut TrackedStream<'_, S>, error: &ErrInfo) -> Result<(), StreamError>
where
    S: MessageStream + ?Sized,
{
    if session.end_sent() {
        debug!(target: DISPATCH_TARGET, %error, "END already sent; error not reported");
        return Ok(());
    }
    session.send_error(error)
}

/// Sends END if still owed, then drains the peer to its END.
fn finish<S>(session: &mut TrackedStream<'_, S>, outcome: DispatchOutcome) -> DispatchOutcome
where
    S: MessageStream + ?Sized,
{
    if !session.end_sent()
        && let Err(error) = session.send_end(None)
    {
        return after_drain_failure(outcome, &error);
    }
    match session.drain() {
        Ok(_) => outcome,
        Err(error) => after_drain_failure(outcome, &error),
    }
}

fn after_drain_failure(outcome: DispatchOutcome, error: &StreamError) -> DispatchOutcome {
    // The command itself is over; a vanished peer surfaces on the next read.
    if error.is_disconnect() {
        return outcome;
    }
    warn!(target: DISPATCH_TARGET, %error, "failed to terminate command");
    let command = match outcome {
        DispatchOutcome::Completed(command)
        | DispatchOutcome::Undefined(command)
        | DispatchOutcome::Failed { command, .. }
        | DispatchOutcome::Panicked { command, .. }
        | DispatchOutcome::Aborted { command, .. } => command,
        DispatchOutcome::Rejected(_)
        | DispatchOutcome::ReadFailed(_)
        | DispatchOutcome::Disconnected => CommandName::new(""),
    };
    DispatchOutcome::Aborted {
        command,
        error: error.to_err_info(),
    }
}

fn aborted(command: CommandName, error: &StreamError) -> DispatchOutcome {
    if error.is_disconnect() {
        debug!(target: DISPATCH_TARGET, %command, "peer disconnected mid-command");
        return DispatchOutcome::Disconnected;
    }
    warn!(target: DISPATCH_TARGET, %command, %error, "transport failed mid-command");
    DispatchOutcome::Aborted {
        command,
        error: error.to_err_info(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::command::commands;
    use crate::error::CommandError;
    use crate::exchange::Exchange;
    use crate::stream::{MAX_FRAME_BYTES, MessageStreamExt};
    use crate::testing::{ScriptedStream, spawn_server, tcp_pair};

    fn text(value: &str) -> Message {
        Message::Data(ExchangeData::from_text(value))
    }

    fn end() -> Message {
        Message::End(ExchangeData::empty())
    }

    fn ack() -> Message {
        Message::Data(ExchangeData::empty())
    }

    #[fixture]
    fn dispatcher() -> Dispatcher {
        let registry = CommandRegistry::new();
        registry.register(commands::HELLO, |_stream: &mut dyn MessageStream, _context: &CommandContext| {
            Ok(ExchangeData::from_text("pong"))
        });
        registry.register(
            CommandName::from_static("/echo"),
            |_stream: &mut dyn MessageStream, context: &CommandContext| Ok(context.initial().clone()),
        );
        registry.register(
            CommandName::from_static("/reject"),
            |_stream: &mut dyn MessageStream, _context: &CommandContext| {
                Err(ErrCode::Validation.info("bad input").into())
            },
        );
        registry.register(
            CommandName::from_static("/big"),
            |_stream: &mut dyn MessageStream, _context: &CommandContext| {
                Ok(ExchangeData::from_bytes(vec![b'a'; 4096]))
            },
        );
        registry.register(
            CommandName::from_static("/crash"),
            |_stream: &mut dyn MessageStream, _context: &CommandContext| -> Result<ExchangeData, CommandError> {
                panic!("boom")
            },
        );
        registry.register(
            CommandName::from_static("/until-end"),
            |stream: &mut dyn MessageStream, _context: &CommandContext| loop {
                stream.receive_data()?;
            },
        );
        Dispatcher::new(Arc::new(registry))
    }

    #[rstest]
    fn success_sends_ack_then_end_with_payload(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/hello"), ack(), end(), text("/next")]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        assert_eq!(outcome, DispatchOutcome::Completed(commands::HELLO));
        assert_eq!(
            stream.sent(),
            &[ack(), Message::End(ExchangeData::from_text("pong"))]
        );
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn handler_sees_initial_payload(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/echo"), text("hi"), end()]);

        dispatcher.dispatch(&mut stream, None);

        assert_eq!(stream.sent().last(), Some(&Message::End(ExchangeData::from_text("hi"))));
    }

    #[rstest]
    fn handler_error_is_sent_before_end(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/reject"), ack(), end(), text("/hello")]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        let error = ErrCode::Validation.info("bad input");
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                command: CommandName::from_static("/reject"),
                error: error.clone(),
            }
        );
        assert!(outcome.keeps_connection());
        assert_eq!(stream.sent(), &[ack(), Message::Error(error), end()]);
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn command_after_handler_error_runs(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([
            text("/reject"),
            ack(),
            end(),
            text("/hello"),
            ack(),
            end(),
        ]);

        dispatcher.dispatch(&mut stream, None);
        let outcome = dispatcher.dispatch(&mut stream, None);

        assert_eq!(outcome, DispatchOutcome::Completed(commands::HELLO));
        assert_eq!(
            stream.sent().last(),
            Some(&Message::End(ExchangeData::from_text("pong")))
        );
        assert_eq!(stream.remaining(), 0);
    }

    #[rstest]
    fn oversized_reply_is_reported_in_place_of_the_payload(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/big"), ack(), end(), text("/hello")])
            .with_payload_limit(1024);

        let outcome = dispatcher.dispatch(&mut stream, None);

        let DispatchOutcome::Failed { command, error } = &outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(command.as_str(), "/big");
        assert_eq!(error.code(), ErrCode::ServerInside);
        assert!(error.message().contains("frame limit"));
        assert_eq!(stream.sent(), &[ack(), Message::Error(error.clone()), end()]);
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn malformed_initial_payload_is_a_parse_error(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/echo")])
            .then_fail(StreamError::Codec {
                message: "expected value".to_owned(),
                source: None,
            })
            .then(end())
            .then(text("/hello"));

        let outcome = dispatcher.dispatch(&mut stream, None);

        let DispatchOutcome::Failed { error, .. } = &outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(error.code(), ErrCode::DataParse);
        assert!(outcome.keeps_connection());
        assert_eq!(stream.sent(), &[ack(), Message::Error(error.clone()), end()]);
        assert_eq!(stream.remaining(), 1);
    }

    #[test]
    fn oversized_reply_keeps_tcp_connection_usable() {
        let registry = CommandRegistry::new();
        registry.register(commands::HELLO, |_stream: &mut dyn MessageStream, _context: &CommandContext| {
            Ok(ExchangeData::from_text("pong"))
        });
        registry.register(
            CommandName::from_static("/big"),
            |_stream: &mut dyn MessageStream, _context: &CommandContext| {
                Ok(ExchangeData::from_bytes(vec![b'a'; MAX_FRAME_BYTES]))
            },
        );
        let (mut client, server) = tcp_pair().expect("loopback pair");
        let served = spawn_server(Arc::new(registry), server);

        let error = Exchange::new("/big")
            .run(&mut client)
            .expect_err("oversized reply");
        assert_eq!(error.code(), ErrCode::ServerInside);

        let reply = Exchange::new(commands::HELLO)
            .run(&mut client)
            .expect("hello on the same connection");
        assert_eq!(reply.as_text(), Some("pong"));

        drop(client);
        assert_eq!(served.join().expect("server thread"), 2);
    }

    #[rstest]
    fn undefined_command_names_the_command(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/nope"), ack(), end(), text("/hello")]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        assert_eq!(outcome, DispatchOutcome::Undefined(CommandName::from_static("/nope")));
        let [Message::Error(info), Message::End(_)] = stream.sent() else {
            panic!("unexpected messages: {:?}", stream.sent());
        };
        assert_eq!(info.code(), ErrCode::CommandUndefined);
        assert!(info.message().contains("/nope"));
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn panic_becomes_single_unknown_error(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([text("/crash"), ack(), end()]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        assert!(matches!(outcome, DispatchOutcome::Panicked { .. }));
        let errors: Vec<_> = stream
            .sent()
            .iter()
            .filter_map(|message| match message {
                Message::Error(info) => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), ErrCode::Unknown);
        assert!(errors[0].message().contains("boom"));
        assert_eq!(stream.sent().last(), Some(&end()));
    }

    #[rstest]
    fn peer_end_seen_by_handler_is_not_awaited_again(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([
            text("/until-end"),
            ack(),
            text("one"),
            end(),
            text("/hello"),
        ]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        assert_eq!(outcome, DispatchOutcome::Completed(CommandName::from_static("/until-end")));
        assert_eq!(stream.sent(), &[ack(), end()]);
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn disconnect_before_command_is_not_an_error(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([]);
        assert_eq!(dispatcher.dispatch(&mut stream, None), DispatchOutcome::Disconnected);
        assert!(stream.sent().is_empty());
    }

    #[rstest]
    fn read_failure_is_reported_locally(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([]).then_fail(StreamError::Codec {
            message: "garbage".to_owned(),
            source: None,
        });

        let outcome = dispatcher.dispatch(&mut stream, None);

        let DispatchOutcome::ReadFailed(info) = &outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(info.code(), ErrCode::ReadCommand);
        assert!(!outcome.keeps_connection());
        assert!(stream.sent().is_empty());
    }

    #[rstest]
    fn non_data_command_is_rejected_in_sync(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([end(), text("/hello")]);

        let outcome = dispatcher.dispatch(&mut stream, None);

        assert!(matches!(outcome, DispatchOutcome::Rejected(ref info) if info.code() == ErrCode::ReadCommand));
        assert!(outcome.keeps_connection());
        assert_eq!(stream.remaining(), 1);
    }

    #[rstest]
    fn serve_runs_until_disconnect(dispatcher: Dispatcher) {
        let mut stream = ScriptedStream::new([
            text("/hello"),
            ack(),
            end(),
            text("/nope"),
            end(),
            text("/hello"),
            ack(),
            end(),
        ]);

        assert_eq!(dispatcher.serve(&mut stream, Some("peer")), 3);
    }
}
