//! Drives one profiling session end to end.
//!
//! spawn, `initialize`, `initialized`, `didOpen` per file, wait for
//! diagnostics, shutdown. Any failure along the way still runs the
//! shutdown sequence before the error is returned, so a failed run never
//! leaves the server process behind.

use std::io;
use std::path::{Path, PathBuf};

use tokio::time::Instant;
use url::Url;

use crate::diagnostics;
use crate::error::TransportError;
use crate::protocol::{
    self, DID_OPEN, INITIALIZE, INITIALIZED, PUBLISH_DIAGNOSTICS, PathToUriError,
};
use crate::session::ServerSession;
use crate::stderr::EchoFilter;
use crate::types::{
    DiagnosticsObservation, HarnessConfig, Milestones, RunReport, SessionState, WaitStatus,
};
use crate::waiter::{NotificationWaiter, WaitCondition};

/// Stderr lines logged when a run fails.
const FAILURE_STDERR_TAIL: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("workspace root {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading {}: {source}", path.display())]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Uri(#[from] PathToUriError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Document {
    uri: Url,
    text: String,
}

struct RunPlan<'a> {
    config: &'a HarnessConfig,
    root_uri: Url,
    documents: Vec<Document>,
}

struct Progress {
    milestones: Milestones,
    wait: WaitStatus,
    diagnostics: Vec<(Url, DiagnosticsObservation)>,
    missing: Vec<Url>,
}

pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one session. Files are read before the server starts so a bad
    /// path fails fast. The root and every document are canonicalized, so
    /// `..` and symlinks never reach the server.
    pub async fn run(&self) -> Result<RunReport, HarnessError> {
        let root = canonical_root(&self.config.workspace_root)?;
        let plan = RunPlan {
            config: &self.config,
            root_uri: protocol::path_to_file_uri(&root)?,
            documents: load_documents(&root, &self.config.files)?,
        };

        let echo = EchoFilter::new(&self.config.echo_keywords);
        let mut session = ServerSession::spawn(&self.config.server, &root, echo)?;
        let started_at = session.started_at();
        let mut milestones = Milestones {
            spawned: Some(session.elapsed()),
            ..Milestones::default()
        };

        let outcome = plan.drive(&mut session, &mut milestones).await;
        if let Err(e) = &outcome {
            if e.is_fatal() {
                tracing::error!("session failed in {:?}: {e}", session.state());
            } else {
                tracing::warn!("session gave up in {:?}: {e}", session.state());
            }
            log_stderr_tail(&session);
        }

        let timeouts = &self.config.timeouts;
        let (shutdown, stderr) = session
            .shutdown(timeouts.shutdown_grace, timeouts.exit)
            .await;
        tracing::info!(?shutdown, "language server shut down");

        let mut progress = outcome?;
        progress.milestones.shutdown_complete = Some(started_at.elapsed());

        Ok(RunReport {
            milestones: progress.milestones,
            diagnostics: progress.diagnostics,
            missing: progress.missing,
            wait: progress.wait,
            shutdown,
            stderr,
        })
    }
}

impl RunPlan<'_> {
    async fn drive(
        &self,
        session: &mut ServerSession,
        milestones: &mut Milestones,
    ) -> Result<Progress, TransportError> {
        let timeouts = &self.config.timeouts;

        session.advance(SessionState::Initializing)?;
        let params = protocol::initialize_params(
            &self.root_uri,
            self.config.initialization_options.as_ref(),
        );
        milestones.initialize_sent = Some(session.elapsed());
        session
            .connection()
            .request(INITIALIZE, Some(params), timeouts.initialize)
            .await?;
        milestones.initialize_response = Some(session.elapsed());
        tracing::info!(elapsed = ?session.elapsed(), "initialize response received");

        session
            .connection()
            .notify(INITIALIZED, Some(serde_json::json!({})))
            .await?;
        session.advance(SessionState::Ready)?;
        milestones.initialized_sent = Some(session.elapsed());

        if !self.documents.is_empty() && !timeouts.settle.is_zero() {
            tokio::time::sleep(timeouts.settle).await;
        }
        for doc in &self.documents {
            let params = protocol::did_open_params(
                &doc.uri,
                &self.config.server.language_id,
                1,
                &doc.text,
            );
            session.connection().notify(DID_OPEN, Some(params)).await?;
            milestones.opened.push((doc.uri.clone(), session.elapsed()));
            tracing::info!(uri = %doc.uri, "opened");
        }

        let condition = if self.documents.is_empty() {
            WaitCondition::Drain
        } else {
            WaitCondition::all_of(self.documents.iter().map(|d| d.uri.clone()))
        };
        let origin = session.started_at();
        let deadline = Instant::now() + timeouts.diagnostics;
        let waiter = NotificationWaiter::new(PUBLISH_DIAGNOSTICS, timeouts.poll_interval);
        let outcome = waiter
            .wait_for(session.connection(), &condition, deadline, |params| {
                diagnostics::observe(params, origin)
            })
            .await?;

        milestones.first_diagnostics = outcome.first_match.map(|at| at - origin);
        if outcome.status == WaitStatus::Satisfied && !self.documents.is_empty() {
            milestones.all_diagnostics = Some(outcome.finished_at - origin);
        }
        if outcome.status != WaitStatus::Satisfied {
            tracing::warn!(
                status = ?outcome.status,
                received = outcome.observed.len(),
                expected = self.documents.len(),
                "diagnostics wait did not complete"
            );
        }

        let missing = self
            .documents
            .iter()
            .filter(|d| !outcome.observed.contains_key(&d.uri))
            .map(|d| d.uri.clone())
            .collect();
        let mut diagnostics: Vec<_> = outcome.observed.into_iter().collect();
        diagnostics.sort_by_key(|(uri, obs)| (obs.received_at, uri.clone()));

        Ok(Progress {
            milestones: std::mem::take(milestones),
            wait: outcome.status,
            diagnostics,
            missing,
        })
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf, HarnessError> {
    let workspace_error = |source| HarnessError::Workspace {
        path: path.to_path_buf(),
        source,
    };
    let root = std::fs::canonicalize(path).map_err(workspace_error)?;
    if !root.is_dir() {
        return Err(workspace_error(io::Error::new(
            io::ErrorKind::NotFound,
            "not a directory",
        )));
    }
    Ok(root)
}

fn load_documents(root: &Path, files: &[PathBuf]) -> Result<Vec<Document>, HarnessError> {
    files
        .iter()
        .map(|file| {
            let path = root.join(file);
            let text = std::fs::read_to_string(&path).map_err(|source| {
                HarnessError::ReadDocument {
                    path: path.clone(),
                    source,
                }
            })?;
            let canonical = std::fs::canonicalize(&path).map_err(|source| {
                HarnessError::ReadDocument {
                    path: path.clone(),
                    source,
                }
            })?;
            let uri = protocol::path_to_file_uri(&canonical)?;
            Ok(Document { uri, text })
        })
        .collect()
}

fn log_stderr_tail(session: &ServerSession) {
    let records = session.stderr().snapshot();
    let skip = records.len().saturating_sub(FAILURE_STDERR_TAIL);
    for record in &records[skip..] {
        tracing::warn!(target: "server_stderr", "{}", record.line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerConfig;

    #[test]
    fn test_load_documents_resolves_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.r"), "x <- 1\n").unwrap();

        let root = canonical_root(dir.path()).unwrap();
        let docs = load_documents(&root, &[PathBuf::from("sub/a.r")]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "x <- 1\n");
        assert!(docs[0].uri.as_str().ends_with("/sub/a.r"));
        assert_eq!(docs[0].uri.scheme(), "file");
    }

    #[test]
    fn test_document_uris_are_canonical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.r"), "").unwrap();

        let root = canonical_root(&dir.path().join("sub").join("..")).unwrap();
        let docs = load_documents(&root, &[PathBuf::from("sub/../a.r")]).unwrap();
        let expected = std::fs::canonicalize(dir.path().join("a.r")).unwrap();
        assert_eq!(docs[0].uri, protocol::path_to_file_uri(&expected).unwrap());
        assert!(!docs[0].uri.as_str().contains(".."));
        assert_eq!(root, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_missing_document_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_documents(dir.path(), &[PathBuf::from("nope.r")])
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, HarnessError::ReadDocument { .. }));
    }

    #[test]
    fn test_workspace_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "").unwrap();
        assert!(matches!(
            canonical_root(&file),
            Err(HarnessError::Workspace { .. })
        ));
        assert!(canonical_root(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_before_any_protocol_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::new(
            ServerConfig::new("definitely-not-a-real-language-server-binary"),
            dir.path(),
        );
        let err = Harness::new(config).run().await.err().expect("must fail");
        assert!(matches!(
            err,
            HarnessError::Transport(TransportError::Spawn { .. })
        ));
    }
}
