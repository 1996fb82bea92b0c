//! Public types consumed by the CLI.
//!
//! The CLI constructs a [`HarnessConfig`], hands it to
//! [`Harness`](crate::Harness), and renders the returned [`RunReport`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::stderr::StderrRecord;

/// How to launch the language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "rust-analyzer") or path.
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, passed through uninterpreted.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// LSP language identifier used in `didOpen` (e.g. "rust", "r").
    #[serde(default = "default_language_id")]
    pub language_id: String,
}

fn default_language_id() -> String {
    String::from("plaintext")
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            language_id: default_language_id(),
        }
    }
}

/// Deadlines for each blocking phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for the `initialize` response.
    pub initialize: Duration,
    /// Overall bound on the diagnostics wait (or the observation window
    /// when no files are opened).
    pub diagnostics: Duration,
    /// Bound on a single read attempt inside a longer wait.
    pub poll_interval: Duration,
    /// Pause between `initialized` and the first `didOpen`.
    pub settle: Duration,
    /// Wait for the `shutdown` response.
    pub shutdown_grace: Duration,
    /// Wait for the process to exit after `exit` before killing it.
    pub exit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initialize: Duration::from_secs(30),
            diagnostics: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            settle: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            exit: Duration::from_secs(5),
        }
    }
}

/// Everything one profiling session needs. Passed in explicitly; the harness
/// keeps no global state.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: ServerConfig,
    /// Working directory of the server and the `rootUri` of the session.
    pub workspace_root: PathBuf,
    /// Files announced with `didOpen`; their diagnostics complete the wait.
    pub files: Vec<PathBuf>,
    /// Opaque `initializationOptions` payload.
    pub initialization_options: Option<serde_json::Value>,
    pub timeouts: Timeouts,
    /// Case-insensitive keywords selecting server stderr lines to echo.
    pub echo_keywords: Vec<String>,
}

impl HarnessConfig {
    pub fn new(server: ServerConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            server,
            workspace_root: workspace_root.into(),
            files: Vec::new(),
            initialization_options: None,
            timeouts: Timeouts::default(),
            echo_keywords: Vec::new(),
        }
    }
}

/// Lifecycle of a server session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Spawned,
    Initializing,
    Ready,
    ShuttingDown,
    Exited,
}

impl SessionState {
    /// The single state that normally follows this one.
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Spawned => Some(Self::Initializing),
            Self::Initializing => Some(Self::Ready),
            Self::Ready => Some(Self::ShuttingDown),
            Self::ShuttingDown => Some(Self::Exited),
            Self::Exited => None,
        }
    }
}

/// Latest diagnostics publication seen for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsObservation {
    pub count: usize,
    /// Offset from session start.
    pub received_at: Duration,
}

/// How a deadline-bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Satisfied,
    TimedOut,
    /// The server closed its output before the condition held.
    Closed,
}

/// How the server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own within the exit bound.
    Exited(ExitStatus),
    /// Still running after the exit bound and was killed.
    Killed,
    /// Status could not be determined.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// State the session was in when shutdown began; anything but `Ready`
    /// means the session was abandoned.
    pub from: SessionState,
    /// Whether the server answered `shutdown` within the grace period.
    pub acknowledged: bool,
    pub exit: ExitOutcome,
}

/// Elapsed-time milestones, all offsets from session start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Milestones {
    pub spawned: Option<Duration>,
    pub initialize_sent: Option<Duration>,
    pub initialize_response: Option<Duration>,
    pub initialized_sent: Option<Duration>,
    pub opened: Vec<(Url, Duration)>,
    pub first_diagnostics: Option<Duration>,
    pub all_diagnostics: Option<Duration>,
    pub shutdown_complete: Option<Duration>,
}

/// Result of one complete session.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub milestones: Milestones,
    /// Per-document observations in arrival order of their latest update.
    pub diagnostics: Vec<(Url, DiagnosticsObservation)>,
    /// Documents that were opened but never received diagnostics.
    pub missing: Vec<Url>,
    pub wait: WaitStatus,
    pub shutdown: ShutdownReport,
    pub stderr: Vec<StderrRecord>,
}

impl RunReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.wait == WaitStatus::Satisfied
    }
}
