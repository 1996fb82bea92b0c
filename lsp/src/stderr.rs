//! Background drain for the server's stderr.
//!
//! The server's log stream must be read continuously or the OS pipe fills and
//! the server stalls mid-write. The drain runs as its own task for the life
//! of the session and stops only at end-of-stream, which happens when the
//! child exits.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

/// One line of server stderr with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StderrRecord {
    /// Offset from session start at the moment the line was read.
    pub elapsed: Duration,
    pub line: String,
}

/// Append-only record sequence shared between the drain task and readers.
#[derive(Debug, Clone, Default)]
pub struct StderrLog {
    records: Arc<Mutex<Vec<StderrRecord>>>,
}

impl StderrLog {
    fn push(&self, record: StderrRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StderrRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyword allow-list deciding which stderr lines are echoed to the log.
#[derive(Debug, Clone, Default)]
pub struct EchoFilter {
    keywords: Vec<String>,
}

impl EchoFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lower = line.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Longest stderr line kept; the rest of an over-long line is dropped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Splits raw stderr chunks into lines without letting one unterminated line
/// grow past [`MAX_LINE_BYTES`].
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
    /// Inside an over-long line whose first `MAX_LINE_BYTES` were emitted.
    discarding: bool,
}

impl LineSplitter {
    fn push(&mut self, mut chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        while !chunk.is_empty() {
            let newline = chunk.iter().position(|&b| b == b'\n');
            let (head, rest) = match newline {
                Some(i) => (&chunk[..i], &chunk[i + 1..]),
                None => (chunk, &[][..]),
            };
            if !self.discarding {
                let room = MAX_LINE_BYTES - self.pending.len();
                self.pending.extend_from_slice(&head[..head.len().min(room)]);
                if head.len() > room {
                    tracing::debug!(
                        "server stderr line exceeds {MAX_LINE_BYTES} bytes; truncating"
                    );
                    emit(&self.pending);
                    self.pending.clear();
                    self.discarding = true;
                }
            }
            if newline.is_some() {
                if !self.discarding {
                    emit(&self.pending);
                }
                self.pending.clear();
                self.discarding = false;
            }
            chunk = rest;
        }
    }

    fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.discarding && !self.pending.is_empty() {
            emit(&self.pending);
        }
        self.pending.clear();
        self.discarding = false;
    }
}

/// Background reader for the server's stderr. Dropping the drain aborts the
/// task.
pub struct StderrDrain {
    log: StderrLog,
    read_task: JoinHandle<()>,
}

impl StderrDrain {
    /// Start draining `reader` on a new task. Timestamps are offsets from
    /// `origin`.
    pub fn spawn<R>(mut reader: R, origin: Instant, echo: EchoFilter) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log = StderrLog::default();
        let task_log = log.clone();
        let read_task = tokio::spawn(async move {
            let record = |raw: &[u8]| {
                let elapsed = origin.elapsed();
                let decoded = String::from_utf8_lossy(raw);
                let line = decoded.trim();
                if line.is_empty() {
                    return;
                }
                if echo.matches(line) {
                    tracing::info!(
                        target: "server_stderr",
                        "[{:.0}ms] {line}",
                        elapsed.as_secs_f64() * 1000.0
                    );
                }
                task_log.push(StderrRecord {
                    elapsed,
                    line: line.to_string(),
                });
            };

            let mut splitter = LineSplitter::default();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => splitter.push(&buf[..n], record),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!("reading server stderr failed: {e}");
                        break;
                    }
                }
            }
            splitter.finish(record);
            tracing::debug!(lines = task_log.len(), "server stderr closed");
        });
        Self { log, read_task }
    }

    /// Live view of the records; grows until the stream closes.
    #[must_use]
    pub fn log(&self) -> &StderrLog {
        &self.log
    }

    /// Wait up to `bound` for end-of-stream, then return the final records.
    ///
    /// A grandchild that inherited the pipe can hold it open after the server
    /// exits; the task is aborted when the drain drops in that case.
    pub async fn finish(mut self, bound: Duration) -> Vec<StderrRecord> {
        if timeout(bound, &mut self.read_task).await.is_err() {
            tracing::debug!("server stderr still open after {bound:?}; aborting drain");
        }
        self.log.snapshot()
    }
}

impl Drop for StderrDrain {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}
