//! Client side of one JSON-RPC stream pair.
//!
//! A [`Connection`] owns the framed reader and writer. Writes come from the
//! orchestrating task only, so no locking is involved. Reads preserve stream
//! order: notifications that arrive while a request is awaiting its response
//! are parked in a backlog and handed out by [`Connection::receive`] before
//! any newer input.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::codec::{FrameReader, FrameWriter, ReadOutcome};
use crate::error::{Result, TransportError};
use crate::message::{Message, RequestId, ResponseError};

pub struct Connection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    backlog: VecDeque<Message>,
    next_id: i64,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            backlog: VecDeque::new(),
            next_id: 1,
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        tracing::debug!(
            method = message.method().unwrap_or("<response>"),
            "-> server"
        );
        self.writer.write_message(message).await
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(&Message::notification(method, params)).await
    }

    /// Send a request with the next id and return that id.
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<RequestId> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        self.send(&Message::request(id.clone(), method, params))
            .await?;
        Ok(id)
    }

    /// Next message in stream order, giving up at `deadline`.
    pub async fn receive(&mut self, deadline: Instant) -> Result<ReadOutcome> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(ReadOutcome::Message(message));
        }
        self.reader.read_message_until(deadline).await
    }

    /// Read until the response for `id` arrives.
    ///
    /// Notifications seen on the way are parked for [`Self::receive`];
    /// server requests and stray responses go through [`Self::dispatch`].
    pub async fn await_response(
        &mut self,
        id: &RequestId,
        operation: &'static str,
        within: Duration,
    ) -> Result<Result<Value, ResponseError>> {
        let deadline = Instant::now() + within;
        loop {
            match self.reader.read_message_until(deadline).await? {
                ReadOutcome::Message(Message::Response {
                    id: got,
                    outcome,
                }) if &got == id => return Ok(outcome),
                ReadOutcome::Message(message @ Message::Notification { .. }) => {
                    self.backlog.push_back(message);
                }
                ReadOutcome::Message(message) => self.dispatch(message).await?,
                ReadOutcome::TimedOut => {
                    return Err(TransportError::Timeout {
                        operation,
                        after: within,
                    });
                }
                ReadOutcome::Closed => return Err(TransportError::StreamClosed { operation }),
            }
        }
    }

    /// Send a request and wait up to `within` for a successful result.
    pub async fn request(
        &mut self,
        method: &'static str,
        params: Option<Value>,
        within: Duration,
    ) -> Result<Value> {
        let id = self.send_request(method, params).await?;
        match self.await_response(&id, method, within).await? {
            Ok(result) => Ok(result),
            Err(error) => Err(TransportError::RequestFailed {
                method: method.to_string(),
                error,
            }),
        }
    }

    /// Handle a message nobody is waiting for.
    ///
    /// Server requests get a method-not-found reply right away; many servers
    /// block until `workspace/configuration` or `client/registerCapability`
    /// is answered.
    pub async fn dispatch(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Request { id, method, .. } => {
                tracing::debug!("server sent request {method}; replying method not found");
                let reply = Message::Response {
                    id,
                    outcome: Err(ResponseError::method_not_found(&method)),
                };
                self.send(&reply).await?;
            }
            Message::Response { id, .. } => {
                tracing::debug!("ignoring response for unknown request id {id}");
            }
            Message::Notification { method, params } => match method.as_str() {
                "window/logMessage" | "window/showMessage" => {
                    let text = params
                        .as_ref()
                        .and_then(|p| p.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    tracing::debug!(target: "server_log", "{text}");
                }
                _ => tracing::trace!("ignoring notification: {method}"),
            },
        }
        Ok(())
    }

    /// Number of notifications parked while awaiting a response.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

    use super::Connection;
    use crate::codec::{FrameReader, FrameWriter};

    pub(crate) type TestConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// The far end of an in-memory connection, playing the server.
    pub(crate) struct FakeServer {
        pub reader: FrameReader<ReadHalf<DuplexStream>>,
        pub writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    pub(crate) fn connected() -> (TestConnection, FakeServer) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);
        (
            Connection::new(client_read, client_write),
            FakeServer {
                reader: FrameReader::new(server_read),
                writer: FrameWriter::new(server_write),
            },
        )
    }
}
