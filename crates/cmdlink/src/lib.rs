//! Command exchange protocol core.
//!
//! Two peers share one duplex connection and take turns running named
//! commands over it. The server side resolves each command in a
//! [`CommandRegistry`] and runs it through a [`Dispatcher`]; the client side
//! drives the conversation with an [`Exchange`]. Both sides speak through a
//! [`MessageStream`], which carries three kinds of message: DATA, ERROR and
//! the END sentinel.
//!
//! Every command cycle finishes with both peers having sent END, whatever
//! happened in between. That rule is what keeps a connection reusable after a
//! handler error, an unknown command or a handler panic.
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use cmdlink::{CommandContext, CommandRegistry, Dispatcher, ExchangeData, JsonLineStream, MessageStream, commands};
//!
//! let registry = CommandRegistry::new();
//! registry.register(commands::HELLO, |_stream: &mut dyn MessageStream, _context: &CommandContext| {
//!     Ok(ExchangeData::from_text("pong"))
//! });
//! let dispatcher = Dispatcher::new(Arc::new(registry));
//!
//! let listener = TcpListener::bind("127.0.0.1:9779")?;
//! let (socket, _) = listener.accept()?;
//! dispatcher.serve(&mut JsonLineStream::new(socket), None);
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod command;
mod data;
mod dispatch;
mod error;
mod exchange;
mod registry;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use command::{CommandName, commands};
pub use data::ExchangeData;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{CommandError, ErrCode, ErrInfo, Translation};
pub use exchange::{
    Exchange, ExchangeState, MessageInterceptor, Step, TransportDecision, TransportInterceptor,
};
pub use registry::{CommandContext, CommandHandler, CommandRegistry, HandlerResult, RegistryError};
pub use stream::{
    JsonLineStream, MAX_FRAME_BYTES, Message, MessageStream, MessageStreamExt, StreamError,
    TrackedStream,
};

#[cfg(test)]
mod tests;
