//! Test doubles for exercising the protocol without a daemon.

use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::data::ExchangeData;
use crate::dispatch::Dispatcher;
use crate::error::ErrInfo;
use crate::registry::CommandRegistry;
use crate::stream::{JsonLineStream, Message, MessageStream, StreamError};

/// In-memory stream that replays scripted input and records every send.
///
/// Once the script runs out, receives fail with
/// [`StreamError::Disconnected`].
#[derive(Debug, Default)]
pub struct ScriptedStream {
    incoming: VecDeque<Result<Message, StreamError>>,
    sent: Vec<Message>,
    payload_limit: Option<usize>,
}

impl ScriptedStream {
    /// Creates a stream that will deliver `messages` in order.
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            incoming: messages.into_iter().map(Ok).collect(),
            sent: Vec::new(),
            payload_limit: None,
        }
    }

    /// Fails sends whose payload exceeds `limit` bytes with
    /// [`StreamError::FrameTooLarge`], recording nothing, the way a framed
    /// transport refuses an oversized frame.
    #[must_use]
    pub const fn with_payload_limit(mut self, limit: usize) -> Self {
        self.payload_limit = Some(limit);
        self
    }

    /// Queues another message after those already scripted.
    #[must_use]
    pub fn then(mut self, message: Message) -> Self {
        self.incoming.push_back(Ok(message));
        self
    }

    /// Queues a transport failure after the scripted messages.
    #[must_use]
    pub fn then_fail(mut self, error: StreamError) -> Self {
        self.incoming.push_back(Err(error));
        self
    }

    /// Messages sent through this stream, END payloads normalised to empty
    /// when absent.
    #[must_use]
    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    /// Number of scripted messages not yet received.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }
}

impl ScriptedStream {
    fn record(&mut self, message: Message, size: usize) -> Result<(), StreamError> {
        if let Some(max_size) = self.payload_limit
            && size > max_size
        {
            return Err(StreamError::FrameTooLarge { size, max_size });
        }
        self.sent.push(message);
        Ok(())
    }
}

impl MessageStream for ScriptedStream {
    fn send_data(&mut self, payload: &ExchangeData) -> Result<(), StreamError> {
        self.record(Message::Data(payload.clone()), payload.len())
    }

    fn send_error(&mut self, error: &ErrInfo) -> Result<(), StreamError> {
        let size = error.message().len() + error.raw().map_or(0, ExchangeData::len);
        self.record(Message::Error(error.clone()), size)
    }

    fn send_end(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError> {
        let payload = payload.cloned().unwrap_or_default();
        let size = payload.len();
        self.record(Message::End(payload), size)
    }

    fn receive(&mut self) -> Result<Message, StreamError> {
        self.incoming
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::Disconnected))
    }
}

/// Connects two JSONL streams over a loopback TCP socket.
///
/// # Errors
///
/// Returns an error when the loopback socket cannot be set up.
pub fn tcp_pair() -> io::Result<(JsonLineStream<TcpStream>, JsonLineStream<TcpStream>)> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let address = listener.local_addr()?;
    let client = TcpStream::connect(address)?;
    let (server, _) = listener.accept()?;
    Ok((JsonLineStream::new(client), JsonLineStream::new(server)))
}

/// Serves `stream` with a dispatcher on a background thread.
///
/// The thread returns the number of commands that completed their drain
/// once the client disconnects.
pub fn spawn_server(
    registry: Arc<CommandRegistry>,
    mut stream: JsonLineStream<TcpStream>,
) -> JoinHandle<usize> {
    thread::spawn(move || Dispatcher::new(registry).serve(&mut stream, Some("test-client")))
}
