//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! [`encode`] and [`decode`] are pure functions over bytes; [`FrameReader`]
//! and [`FrameWriter`] put them on top of async pipes.
//!
//! Header parsing is deliberately lenient: the key match is
//! case-insensitive, the first `Content-Length` line wins when duplicated,
//! and unrecognized lines are skipped. Real servers emit all of these.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};

use crate::error::{ProtocolError, Result, TransportError};
use crate::message::Message;

/// Maximum header block size before the terminator must appear.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Maximum frame body size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK: usize = 8 * 1024;

/// Serialize a message into one contiguous frame (header followed by body).
pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(&message.to_value())?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Outcome of scanning a byte buffer for one complete frame.
#[derive(Debug)]
pub enum Decoded {
    Frame { message: Message, consumed: usize },
    Incomplete,
}

/// Try to decode the first frame in `buf`.
///
/// Returns [`Decoded::Incomplete`] while the header terminator or the full
/// body has not arrived yet.
pub fn decode(buf: &[u8]) -> Result<Decoded, ProtocolError> {
    let Some(header_len) = find_terminator(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(ProtocolError::HeaderTooLarge {
                max: MAX_HEADER_BYTES,
            });
        }
        return Ok(Decoded::Incomplete);
    };
    if header_len > MAX_HEADER_BYTES {
        return Err(ProtocolError::HeaderTooLarge {
            max: MAX_HEADER_BYTES,
        });
    }

    let header = std::str::from_utf8(&buf[..header_len]).map_err(|_| ProtocolError::NonUtf8Header)?;
    let content_length = parse_content_length(header)?;
    if content_length > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len: content_length,
            max: MAX_FRAME_BYTES,
        });
    }

    let body_start = header_len + HEADER_TERMINATOR.len();
    let body_end = body_start + content_length;
    if buf.len() < body_end {
        return Ok(Decoded::Incomplete);
    }

    let value: Value =
        serde_json::from_slice(&buf[body_start..body_end]).map_err(ProtocolError::InvalidJson)?;
    let message = Message::from_value(value)?;
    Ok(Decoded::Frame {
        message,
        consumed: body_end,
    })
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_content_length(header: &str) -> Result<usize, ProtocolError> {
    let mut content_length = None;
    for line in header.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if content_length.is_none() && key.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            let len = value
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
            content_length = Some(len);
        }
    }
    content_length.ok_or(ProtocolError::MissingContentLength)
}

/// Classify a non-empty buffer left over when the stream hit EOF.
fn truncated(buf: &[u8]) -> ProtocolError {
    let Some(header_len) = find_terminator(buf) else {
        return ProtocolError::TruncatedHeader {
            received: buf.len(),
        };
    };
    let header = match std::str::from_utf8(&buf[..header_len]) {
        Ok(header) => header,
        Err(_) => return ProtocolError::NonUtf8Header,
    };
    match parse_content_length(header) {
        Ok(expected) => ProtocolError::TruncatedBody {
            expected,
            received: buf.len() - header_len - HEADER_TERMINATOR.len(),
        },
        Err(e) => e,
    }
}

/// Result of one bounded read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    Message(Message),
    /// The deadline passed before a complete frame arrived. Partial bytes are
    /// kept and the next read continues from them.
    TimedOut,
    /// Clean end of stream on a frame boundary.
    Closed,
}

/// Reads JSON-RPC frames from an async reader.
///
/// Bytes are pulled into an internal buffer with a cancel-safe read, so a
/// deadline can interrupt a read at any point without losing data.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next frame, blocking as long as it takes.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        match self.read_inner(None).await? {
            ReadOutcome::Message(message) => Ok(Some(message)),
            ReadOutcome::Closed | ReadOutcome::TimedOut => Ok(None),
        }
    }

    /// Read the next frame, giving up at `deadline`.
    pub async fn read_message_until(&mut self, deadline: Instant) -> Result<ReadOutcome> {
        self.read_inner(Some(deadline)).await
    }

    async fn read_inner(&mut self, deadline: Option<Instant>) -> Result<ReadOutcome> {
        loop {
            if let Decoded::Frame { message, consumed } = decode(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(ReadOutcome::Message(message));
            }

            self.buf.reserve(READ_CHUNK);
            let read = self.reader.read_buf(&mut self.buf);
            let read = match deadline {
                Some(deadline) => match timeout_at(deadline, read).await {
                    Ok(read) => read,
                    Err(_) => return Ok(ReadOutcome::TimedOut),
                },
                None => read.await,
            };
            let bytes_read = read.map_err(|e| TransportError::io("reading frame", e))?;

            if bytes_read == 0 {
                if self.buf.is_empty() {
                    return Ok(ReadOutcome::Closed);
                }
                return Err(truncated(&self.buf).into());
            }
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame as a single buffer, then flush.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        let frame = encode(message).map_err(TransportError::Encode)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::io("writing frame", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::io("flushing frame", e))?;
        Ok(())
    }
}
