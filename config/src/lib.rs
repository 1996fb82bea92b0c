//! TOML configuration for `lsp-probe`.
//!
//! Lookup order: an explicit `--config` path, then `./lsp-probe.toml`, then
//! `~/.lsp-probe/config.toml`. Every section is optional; command-line flags
//! are applied on top of the loaded [`ProbeConfig`] before it is turned into
//! a [`HarnessConfig`].
//!
//! ```toml
//! [server]
//! command = "R"
//! args = ["--slave", "-e", "languageserver::run()"]
//! language_id = "r"
//!
//! [server.env]
//! R_LIBS_USER = "${HOME}/R/library"
//!
//! [workspace]
//! root = "~/src/pkg"
//! files = ["R/validation_functions/collate.r"]
//!
//! [timeouts]
//! diagnostics_secs = 60
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use probe_lsp::{HarnessConfig, ServerConfig, Timeouts};
use serde::Deserialize;

const LOCAL_CONFIG: &str = "lsp-probe.toml";

/// Server stderr lines containing any of these are echoed live.
pub const DEFAULT_ECHO_KEYWORDS: &[&str] =
    &["perf", "init", "scan", "package", "background", "diag"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no language server command configured (use --server or [server] command)")]
    MissingServerCommand,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub initialize: InitializeSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub stderr: StderrSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub language_id: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    pub root: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// `initializationOptions` is any TOML value, forwarded as JSON.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializeSection {
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsSection {
    pub initialize_secs: Option<u64>,
    pub diagnostics_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub exit_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StderrSection {
    pub echo_keywords: Option<Vec<String>>,
}

impl TimeoutsSection {
    #[must_use]
    pub fn resolve(&self) -> Timeouts {
        let defaults = Timeouts::default();
        Timeouts {
            initialize: self
                .initialize_secs
                .map_or(defaults.initialize, Duration::from_secs),
            diagnostics: self
                .diagnostics_secs
                .map_or(defaults.diagnostics, Duration::from_secs),
            poll_interval: self
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            settle: self.settle_ms.map_or(defaults.settle, Duration::from_millis),
            shutdown_grace: self
                .shutdown_grace_ms
                .map_or(defaults.shutdown_grace, Duration::from_millis),
            exit: self.exit_secs.map_or(defaults.exit, Duration::from_secs),
        }
    }
}

impl ProbeConfig {
    /// Load from `explicit` if given (it must exist), else from the first
    /// default location that exists, else an empty config.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Self::from_file(path);
        }
        Self::load_first(&default_paths())
    }

    fn load_first(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                tracing::debug!("no config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve into a harness config. `${VAR}` is expanded in the command,
    /// arguments, env values and paths; a leading `~` in paths becomes the
    /// home directory. A missing workspace root means the current directory.
    pub fn into_harness_config(self) -> Result<HarnessConfig, ConfigError> {
        let command = self
            .server
            .command
            .as_deref()
            .map(expand_path_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::MissingServerCommand)?;

        let mut server = ServerConfig::new(command);
        server.args = self.server.args.iter().map(|a| expand_env_vars(a)).collect();
        server.env = self
            .server
            .env
            .into_iter()
            .map(|(k, v)| (k, expand_env_vars(&v)))
            .collect();
        if let Some(language_id) = self.server.language_id {
            server.language_id = language_id;
        }

        let root = self
            .workspace
            .root
            .as_deref()
            .map_or_else(|| PathBuf::from("."), |r| PathBuf::from(expand_path_str(r)));

        let mut config = HarnessConfig::new(server, root);
        config.files = self
            .workspace
            .files
            .iter()
            .map(|f| PathBuf::from(expand_path_str(f)))
            .collect();
        config.initialization_options = self.initialize.options;
        config.timeouts = self.timeouts.resolve();
        config.echo_keywords = self.stderr.echo_keywords.unwrap_or_else(|| {
            DEFAULT_ECHO_KEYWORDS
                .iter()
                .map(|k| (*k).to_string())
                .collect()
        });
        Ok(config)
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".lsp-probe").join("config.toml"));
    }
    paths
}

/// Replace `${VAR}` with the variable's value; unset variables expand to
/// nothing and an unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |var| std::env::var(var).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&lookup(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_tilde(value: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return value.to_string();
    };
    if value == "~" {
        return home.display().to_string();
    }
    match value.strip_prefix("~/") {
        Some(rest) => home.join(rest).display().to_string(),
        None => value.to_string(),
    }
}

fn expand_path_str(value: &str) -> String {
    expand_tilde(&expand_env_vars(value), dirs::home_dir().as_deref())
}
