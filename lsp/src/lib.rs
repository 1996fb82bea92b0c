//! Stdio LSP transport and startup-latency harness.
//!
//! Spawns a language server, frames JSON-RPC over its stdin/stdout, drains
//! its stderr in the background, and waits under a deadline for the
//! diagnostics it publishes.

pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod stderr;
pub mod types;
pub mod waiter;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod session;

mod harness;

pub use diagnostics::document_label;
pub use error::{ProtocolError, TransportError};
pub use harness::{Harness, HarnessError};
pub use message::{Message, RequestId, ResponseError};
pub use protocol::{PathToUriError, path_to_file_uri};
pub use session::{ServerConnection, ServerSession};
pub use stderr::{EchoFilter, StderrDrain, StderrLog, StderrRecord};
pub use types::{
    DiagnosticsObservation, ExitOutcome, HarnessConfig, Milestones, RunReport, ServerConfig,
    SessionState, ShutdownReport, Timeouts, WaitStatus,
};
pub use waiter::{NotificationWaiter, WaitCondition, WaitOutcome};
