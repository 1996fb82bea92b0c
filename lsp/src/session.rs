//! Server session: owns the child process and its three pipes.
//!
//! stdin/stdout carry framed JSON-RPC through a [`Connection`]; stderr is
//! handed to a [`StderrDrain`] the moment the process starts. Dropping a
//! session kills the child (`kill_on_drop`), and [`ServerSession::shutdown`]
//! is the orderly path: `shutdown` request, `exit` notification, bounded
//! wait, then kill.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, timeout};

use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::protocol::{EXIT, SHUTDOWN};
use crate::stderr::{EchoFilter, StderrDrain, StderrLog, StderrRecord};
use crate::types::{ExitOutcome, ServerConfig, SessionState, ShutdownReport};

/// How long to wait for stderr EOF once the process is gone.
const STDERR_FINISH_TIMEOUT: Duration = Duration::from_millis(500);

pub type ServerConnection = Connection<ChildStdout, ChildStdin>;

pub struct ServerSession {
    child: Child,
    conn: ServerConnection,
    stderr: StderrDrain,
    state: SessionState,
    started_at: Instant,
}

fn check_transition(from: SessionState, to: SessionState) -> Result<()> {
    if from.successor() == Some(to) {
        Ok(())
    } else {
        Err(TransportError::InvalidTransition { from, to })
    }
}

/// `ShuttingDown` is reachable from every state as cleanup; only `Ready`
/// gets there without skipping, so anything earlier is logged as abandoned.
fn enter_shutdown(from: SessionState) -> SessionState {
    let to = SessionState::ShuttingDown;
    match check_transition(from, to) {
        Ok(()) => tracing::debug!("session {from:?} -> {to:?}"),
        Err(_) => tracing::debug!("session abandoned in {from:?}; cleaning up"),
    }
    to
}

fn spawn_error(
    command: &str,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> TransportError {
    TransportError::Spawn {
        command: command.to_string(),
        source: source.into(),
    }
}

impl ServerSession {
    /// Launch the server in `cwd` with `server.env` layered over the
    /// inherited environment, and start draining its stderr.
    pub fn spawn(server: &ServerConfig, cwd: &Path, echo: EchoFilter) -> Result<Self> {
        let started_at = Instant::now();
        let resolved =
            which::which(&server.command).map_err(|e| spawn_error(&server.command, e))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&server.args)
            .envs(&server.env)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| spawn_error(&server.command, e))?;

        let missing = |pipe: &str| {
            spawn_error(
                &server.command,
                io::Error::other(format!("no {pipe} from child")),
            )
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        tracing::info!(
            command = %resolved.display(),
            pid = child.id().unwrap_or_default(),
            "language server spawned"
        );

        Ok(Self {
            child,
            conn: Connection::new(stdout, stdin),
            stderr: StderrDrain::spawn(stderr, started_at, echo),
            state: SessionState::Spawned,
            started_at,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to the next lifecycle state. Skipping a state is an error.
    pub fn advance(&mut self, to: SessionState) -> Result<()> {
        check_transition(self.state, to)?;
        tracing::debug!("session {:?} -> {to:?}", self.state);
        self.state = to;
        Ok(())
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The protocol read/write path.
    pub fn connection(&mut self) -> &mut ServerConnection {
        &mut self.conn
    }

    /// Live view of the stderr records.
    #[must_use]
    pub fn stderr(&self) -> &StderrLog {
        self.stderr.log()
    }

    /// Shut the server down and reap it, whatever state the session is in.
    ///
    /// Waits up to `grace` for the `shutdown` response, sends `exit`, waits
    /// up to `exit_timeout` for the process, and kills it if it is still
    /// running. Never fails; problems are logged and reflected in the
    /// report.
    pub async fn shutdown(
        self,
        grace: Duration,
        exit_timeout: Duration,
    ) -> (ShutdownReport, Vec<StderrRecord>) {
        let Self {
            mut child,
            mut conn,
            stderr,
            state,
            ..
        } = self;
        let from = state;
        let mut state = enter_shutdown(from);

        let acknowledged = match conn.request(SHUTDOWN, None, grace).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("shutdown not acknowledged: {e}");
                false
            }
        };
        if let Err(e) = conn.notify(EXIT, None).await {
            tracing::debug!("sending exit failed: {e}");
        }
        // Closes stdin, which most servers also treat as a signal to exit.
        drop(conn);

        let exit = match timeout(exit_timeout, child.wait()).await {
            Ok(Ok(status)) => ExitOutcome::Exited(status),
            Ok(Err(e)) => {
                tracing::warn!("waiting for language server failed: {e}");
                ExitOutcome::Unknown
            }
            Err(_) => {
                tracing::warn!("language server still running after {exit_timeout:?}; killing");
                match child.kill().await {
                    Ok(()) => ExitOutcome::Killed,
                    Err(e) => {
                        tracing::warn!("killing language server failed: {e}");
                        ExitOutcome::Unknown
                    }
                }
            }
        };
        if let Err(e) = check_transition(state, SessionState::Exited) {
            tracing::warn!("{e}");
        }
        state = SessionState::Exited;
        tracing::debug!("session -> {state:?}");

        let records = stderr.finish(STDERR_FINISH_TIMEOUT).await;
        let report = ShutdownReport {
            from,
            acknowledged,
            exit,
        };
        (report, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_must_not_skip() {
        assert!(check_transition(SessionState::Spawned, SessionState::Initializing).is_ok());
        assert!(check_transition(SessionState::Initializing, SessionState::Ready).is_ok());
        assert!(check_transition(SessionState::Ready, SessionState::ShuttingDown).is_ok());
        assert!(check_transition(SessionState::ShuttingDown, SessionState::Exited).is_ok());

        assert!(matches!(
            check_transition(SessionState::Spawned, SessionState::Ready),
            Err(TransportError::InvalidTransition {
                from: SessionState::Spawned,
                to: SessionState::Ready
            })
        ));
        assert!(check_transition(SessionState::Ready, SessionState::Initializing).is_err());
        assert!(check_transition(SessionState::Exited, SessionState::Exited).is_err());
    }

    #[test]
    fn test_shutdown_is_reachable_from_every_live_state() {
        for from in [
            SessionState::Spawned,
            SessionState::Initializing,
            SessionState::Ready,
        ] {
            assert_eq!(enter_shutdown(from), SessionState::ShuttingDown);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_from_spawned_reaps_process() {
        let session =
            ServerSession::spawn(&ServerConfig::new("cat"), Path::new("."), EchoFilter::default())
                .unwrap();
        assert_eq!(session.state(), SessionState::Spawned);

        let (report, _) = session
            .shutdown(Duration::from_millis(500), Duration::from_secs(2))
            .await;
        assert_eq!(report.from, SessionState::Spawned);
        // `cat` echoes the request back; it is never a valid shutdown reply.
        assert!(!report.acknowledged);
        assert!(matches!(report.exit, ExitOutcome::Exited(_)));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let server = ServerConfig::new("definitely-not-a-real-language-server-binary");
        let err = ServerSession::spawn(&server, Path::new("."), EchoFilter::default())
            .err()
            .expect("spawn should fail");
        match err {
            TransportError::Spawn { command, .. } => {
                assert_eq!(command, "definitely-not-a-real-language-server-binary");
            }
            other => panic!("expected Spawn, got {other:?}"),
        }
    }
}
