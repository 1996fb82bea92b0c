//! Scriptable stub language server used by the end-to-end tests.
//!
//! Speaks `Content-Length` framed JSON-RPC on stdin/stdout. Every received
//! message is logged to stderr as `mock-lsp: received <method>`; flags
//! choose what gets published and which failure to simulate.

use std::future;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, Stdout};

use probe_lsp::codec::{self, FrameReader};
use probe_lsp::{Message, RequestId, ResponseError};

#[derive(Debug, Parser)]
#[command(name = "mock-lsp")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Publish COUNT diagnostics for URI once `initialized` arrives
    /// (repeatable).
    #[arg(long, value_name = "URI=COUNT", value_parser = parse_publish)]
    publish: Vec<(String, usize)>,

    /// Publish COUNT diagnostics for every opened document.
    #[arg(long, value_name = "COUNT")]
    diagnose_on_open: Option<usize>,

    /// Never respond to this request (repeatable).
    #[arg(long, value_name = "METHOD")]
    hang_on: Vec<String>,

    /// Keep running after `exit` and after stdin closes.
    #[arg(long)]
    ignore_exit: bool,

    /// Line written to stderr at startup (repeatable).
    #[arg(long, value_name = "TEXT")]
    stderr_line: Vec<String>,

    /// Send a log notification and a `workspace/configuration` request
    /// before answering `initialize`.
    #[arg(long)]
    interleave: bool,

    /// Exit as soon as this method is received.
    #[arg(long, value_name = "METHOD")]
    exit_on: Option<String>,

    /// Write a malformed frame after `initialized`.
    #[arg(long)]
    garbage_after_initialized: bool,
}

fn parse_publish(raw: &str) -> Result<(String, usize), String> {
    let (uri, count) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected URI=COUNT, got {raw:?}"))?;
    let count = count
        .parse()
        .map_err(|e| format!("bad count in {raw:?}: {e}"))?;
    Ok((uri.to_string(), count))
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct MockServer {
    args: Args,
    stdout: Stdout,
}

impl MockServer {
    async fn send(&mut self, message: &Message) -> Result<()> {
        let frame = codec::encode(message)?;
        self.stdout.write_all(&frame).await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn respond(
        &mut self,
        id: RequestId,
        outcome: Result<Value, ResponseError>,
    ) -> Result<()> {
        self.send(&Message::Response { id, outcome }).await
    }

    async fn publish(&mut self, uri: &str, count: usize) -> Result<()> {
        let diagnostics: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "range": {
                        "start": {"line": i, "character": 0},
                        "end": {"line": i, "character": 1}
                    },
                    "severity": 2,
                    "source": "mock-lsp",
                    "message": format!("mock diagnostic {i}")
                })
            })
            .collect();
        let params = json!({"uri": uri, "diagnostics": diagnostics});
        self.send(&Message::notification(
            "textDocument/publishDiagnostics",
            Some(params),
        ))
        .await
    }

    async fn on_request(&mut self, id: RequestId, method: &str) -> Result<()> {
        if self.args.hang_on.iter().any(|m| m == method) {
            return Ok(());
        }
        match method {
            "initialize" => {
                if self.args.interleave {
                    self.send(&Message::notification(
                        "window/logMessage",
                        Some(json!({"type": 3, "message": "mock-lsp starting"})),
                    ))
                    .await?;
                    self.send(&Message::request(
                        RequestId::String("mock-config".into()),
                        "workspace/configuration",
                        Some(json!({"items": [{"section": "mock"}]})),
                    ))
                    .await?;
                }
                self.respond(id, Ok(json!({"capabilities": {}}))).await
            }
            "shutdown" => self.respond(id, Ok(Value::Null)).await,
            other => {
                self.respond(id, Err(ResponseError::method_not_found(other)))
                    .await
            }
        }
    }

    async fn on_notification(&mut self, method: &str, params: Option<&Value>) -> Result<Flow> {
        match method {
            "initialized" => {
                let publish = self.args.publish.clone();
                for (uri, count) in &publish {
                    self.publish(uri, *count).await?;
                }
                if self.args.garbage_after_initialized {
                    self.stdout
                        .write_all(b"Content-Length: not-a-number\r\n\r\n{}")
                        .await?;
                    self.stdout.flush().await?;
                }
            }
            "textDocument/didOpen" => {
                if let Some(count) = self.args.diagnose_on_open
                    && let Some(uri) = params
                        .and_then(|p| p.pointer("/textDocument/uri"))
                        .and_then(Value::as_str)
                {
                    let uri = uri.to_string();
                    self.publish(&uri, count).await?;
                }
            }
            "exit" if !self.args.ignore_exit => return Ok(Flow::Stop),
            _ => {}
        }
        Ok(Flow::Continue)
    }

    async fn run(mut self) -> Result<()> {
        let mut reader = FrameReader::new(tokio::io::stdin());
        while let Some(message) = reader.read_message().await.context("reading stdin")? {
            let method = message.method().unwrap_or("<response>").to_string();
            eprintln!("mock-lsp: received {method}");
            if self.args.exit_on.as_deref() == Some(method.as_str()) {
                return Ok(());
            }

            let flow = match message {
                Message::Request { id, method, .. } => {
                    self.on_request(id, &method).await?;
                    Flow::Continue
                }
                Message::Notification { method, params } => {
                    self.on_notification(&method, params.as_ref()).await?
                }
                Message::Response { .. } => Flow::Continue,
            };
            if flow == Flow::Stop {
                return Ok(());
            }
        }

        if self.args.ignore_exit {
            future::pending::<()>().await;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    for line in &args.stderr_line {
        eprintln!("{line}");
    }
    MockServer {
        args,
        stdout: tokio::io::stdout(),
    }
    .run()
    .await
}
