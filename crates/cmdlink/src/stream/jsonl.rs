//! Line-delimited JSON framing for message streams.
//!
//! Each message is one JSON object terminated by `\n`:
//!
//! ```json
//! {"kind":"data","payload":"cG9uZw=="}
//! {"kind":"error","code":404,"message":"command /nope is not defined"}
//! {"kind":"end","payload":"cG9uZw=="}
//! ```
//!
//! Payloads are base64 encoded, so a frame never contains a raw newline.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Message, MessageStream, STREAM_TARGET, StreamError};
use crate::data::ExchangeData;
use crate::error::{ErrCode, ErrInfo};

/// Maximum size of a single frame in bytes, newline included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Data {
        #[serde(skip_serializing_if = "is_empty_payload")]
        payload: &'a ExchangeData,
    },
    Error {
        code: ErrCode,
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<&'a ExchangeData>,
    },
    End {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<&'a ExchangeData>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InboundFrame {
    Data {
        #[serde(default)]
        payload: ExchangeData,
    },
    Error {
        code: ErrCode,
        #[serde(default)]
        message: String,
        #[serde(default)]
        raw: Option<ExchangeData>,
    },
    End {
        #[serde(default)]
        payload: ExchangeData,
    },
}

impl From<InboundFrame> for Message {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::Data { payload } => Self::Data(payload),
            InboundFrame::Error { code, message, raw } => Self::Error(ErrInfo { code, message, raw }),
            InboundFrame::End { payload } => Self::End(payload),
        }
    }
}

fn is_empty_payload(payload: &&ExchangeData) -> bool {
    payload.is_empty()
}

/// [`MessageStream`] over any blocking byte stream.
///
/// Reads are buffered; every send writes one complete line and flushes it.
#[derive(Debug)]
pub struct JsonLineStream<S> {
    reader: BufReader<S>,
}

impl<S: Read + Write> JsonLineStream<S> {
    /// Wraps a connected byte stream.
    pub fn new(inner: S) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Returns the underlying byte stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Unwraps the underlying byte stream, discarding any buffered input.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    fn write_frame(&mut self, frame: &OutboundFrame<'_>) -> Result<(), StreamError> {
        let mut line = serde_json::to_vec(frame).map_err(StreamError::from_json_error)?;
        line.push(b'\n');
        enforce_limit(line.len())?;
        let writer = self.reader.get_mut();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut line = Vec::new();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buffer) => buffer,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            if available.is_empty() {
                // EOF, either between frames or in the middle of one.
                return Err(StreamError::Disconnected);
            }

            let (consumed, complete) = match available.iter().position(|byte| *byte == b'\n') {
                Some(position) => {
                    let (head, _) = available.split_at(position);
                    line.extend_from_slice(head);
                    (position + 1, true)
                }
                None => {
                    line.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.reader.consume(consumed);
            if let Err(error) = enforce_limit(line.len() + usize::from(complete)) {
                if !complete {
                    self.skip_line()?;
                }
                return Err(error);
            }
            if complete {
                return Ok(line);
            }
        }
    }

    /// Discards input up to and including the next newline, so the frame
    /// after an oversized one is read from its start.
    fn skip_line(&mut self) -> Result<(), StreamError> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buffer) => buffer,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(position) => {
                    self.reader.consume(position + 1);
                    return Ok(());
                }
                None => {
                    let length = available.len();
                    self.reader.consume(length);
                }
            }
        }
    }
}

impl<S: Read + Write> MessageStream for JsonLineStream<S> {
    fn send_data(&mut self, payload: &ExchangeData) -> Result<(), StreamError> {
        self.write_frame(&OutboundFrame::Data { payload })
    }

    fn send_error(&mut self, error: &ErrInfo) -> Result<(), StreamError> {
        self.write_frame(&OutboundFrame::Error {
            code: error.code,
            message: &error.message,
            raw: error.raw.as_ref(),
        })
    }

    fn send_end(&mut self, payload: Option<&ExchangeData>) -> Result<(), StreamError> {
        self.write_frame(&OutboundFrame::End {
            payload: payload.filter(|payload| !payload.is_empty()),
        })
    }

    fn receive(&mut self) -> Result<Message, StreamError> {
        loop {
            let line = self.read_line()?;
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            let frame: InboundFrame =
                serde_json::from_slice(trimmed).map_err(StreamError::from_json_error)?;
            let message = Message::from(frame);
            trace!(target: STREAM_TARGET, kind = message.kind(), "frame received");
            return Ok(message);
        }
    }
}

fn enforce_limit(size: usize) -> Result<(), StreamError> {
    if size > MAX_FRAME_BYTES {
        return Err(StreamError::FrameTooLarge {
            size,
            max_size: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}
