//! lsp-probe: measure how long a language server takes to start and to
//! publish diagnostics.
//!
//! ```text
//! main() -> ProbeConfig::load -> Args::apply -> Harness::run -> report
//! ```
//!
//! The report goes to stdout; logs (including echoed server stderr) go to
//! stderr. The exit code is non-zero when the diagnostics wait did not
//! complete.

mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use probe_config::ProbeConfig;
use probe_lsp::Harness;

use crate::report::Rendered;

#[derive(Debug, Parser)]
#[command(name = "lsp-probe", version, about)]
struct Args {
    /// TOML config file (default: ./lsp-probe.toml, then ~/.lsp-probe/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Language server command.
    #[arg(long, value_name = "COMMAND")]
    server: Option<String>,

    /// Argument for the server command; repeat for several. Replaces
    /// configured arguments.
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Workspace root; the server runs here.
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// File to open, relative to the workspace root; repeat for several.
    /// Replaces configured files.
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Extra environment variable for the server.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// `languageId` sent with didOpen.
    #[arg(long, value_name = "ID")]
    language_id: Option<String>,

    /// Seconds to wait for the initialize response.
    #[arg(long, value_name = "SECS")]
    init_timeout: Option<u64>,

    /// Seconds to wait for diagnostics, or to observe the server when no
    /// files are opened.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Stderr lines shown in the timeline.
    #[arg(long, value_name = "N", default_value_t = 50)]
    stderr_lines: usize,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

impl Args {
    /// Layer command-line values over the loaded config.
    fn apply(&self, config: &mut ProbeConfig) {
        if let Some(server) = &self.server {
            config.server.command = Some(server.clone());
        }
        if !self.args.is_empty() {
            config.server.args.clone_from(&self.args);
        }
        config.server.env.extend(self.env.iter().cloned());
        if let Some(language_id) = &self.language_id {
            config.server.language_id = Some(language_id.clone());
        }
        if let Some(workspace) = &self.workspace {
            config.workspace.root = Some(workspace.display().to_string());
        }
        if !self.files.is_empty() {
            config.workspace.files = self
                .files
                .iter()
                .map(|f| f.display().to_string())
                .collect();
        }
        if let Some(secs) = self.init_timeout {
            config.timeouts.initialize_secs = Some(secs);
        }
        if let Some(secs) = self.timeout {
            config.timeouts.diagnostics_secs = Some(secs);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing();

    let mut config = ProbeConfig::load(args.config.as_deref()).context("loading config")?;
    args.apply(&mut config);
    let config = config.into_harness_config()?;

    tracing::info!(
        server = %config.server.command,
        root = %config.workspace_root.display(),
        files = config.files.len(),
        "starting probe"
    );

    let report = Harness::new(config)
        .run()
        .await
        .context("language server session failed")?;

    print!("{}", Rendered::new(&report, args.stderr_lines));

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
