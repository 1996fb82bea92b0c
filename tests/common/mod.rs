//! Shared test utilities and fixtures
//!
//! A temporary workspace plus a harness config that launches `mock-lsp`
//! with short timeouts.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use probe_lsp::{HarnessConfig, ServerConfig, Timeouts, path_to_file_uri};
use tempfile::TempDir;
use url::Url;

/// Path of the stub server built alongside the tests.
pub fn mock_lsp() -> &'static str {
    env!("CARGO_BIN_EXE_mock-lsp")
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        initialize: Duration::from_secs(5),
        diagnostics: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        settle: Duration::ZERO,
        shutdown_grace: Duration::from_millis(500),
        exit: Duration::from_secs(2),
    }
}

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// A temp directory holding `files` as `(relative path, contents)`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create parent dirs");
            }
            std::fs::write(&path, contents).expect("write workspace file");
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The URI the harness announces for `name`: canonical, so `..` and
    /// symlinked temp dirs resolve.
    pub fn uri(&self, name: &str) -> Url {
        let path = std::fs::canonicalize(self.root().join(name)).expect("canonical path");
        path_to_file_uri(&path).expect("file URI")
    }

    /// The URI for `name` spelled exactly as joined, without resolving
    /// anything.
    pub fn raw_uri(&self, name: &str) -> Url {
        path_to_file_uri(&self.root().join(name)).expect("file URI")
    }

    /// `--publish URI=COUNT` argument pair for `mock-lsp`.
    pub fn publish_arg(&self, name: &str, count: usize) -> [String; 2] {
        [
            "--publish".to_string(),
            format!("{}={count}", self.uri(name)),
        ]
    }

    /// Config that runs `mock-lsp` with `args` and opens `files`.
    pub fn config<S: AsRef<str>>(&self, args: &[S], files: &[&str]) -> HarnessConfig {
        let mut server = ServerConfig::new(mock_lsp());
        server.args = args.iter().map(|a| a.as_ref().to_string()).collect();
        server.language_id = "r".to_string();

        let mut config = HarnessConfig::new(server, self.root());
        config.files = files.iter().map(Into::into).collect();
        config.timeouts = fast_timeouts();
        config
    }
}
