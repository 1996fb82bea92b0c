//! LSP payloads the harness sends and the one notification it consumes.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use url::Url;

pub(crate) const INITIALIZE: &str = "initialize";
pub(crate) const INITIALIZED: &str = "initialized";
pub(crate) const DID_OPEN: &str = "textDocument/didOpen";
pub(crate) const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
pub(crate) const SHUTDOWN: &str = "shutdown";
pub(crate) const EXIT: &str = "exit";

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

pub(crate) fn initialize_params(root_uri: &Url, initialization_options: Option<&Value>) -> Value {
    let name = root_uri
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("workspace");
    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri.as_str(),
        "capabilities": {
            "textDocument": {
                "publishDiagnostics": {
                    "relatedInformation": true
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri.as_str(),
            "name": name
        }]
    });
    if let Some(options) = initialization_options {
        params["initializationOptions"] = options.clone();
    }
    params
}

pub(crate) fn did_open_params(uri: &Url, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri.as_str(),
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

/// The parts of `textDocument/publishDiagnostics` the harness looks at.
/// Diagnostic entries stay opaque; only their number matters.
#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Value>,
}

pub fn path_to_file_uri(path: &Path) -> Result<Url, PathToUriError> {
    Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &Url) -> Option<PathBuf> {
    uri.to_file_path().ok()
}

/// Resolve `..`, `.` and symlinks in a `file:` URI so the harness and the
/// server agree on one spelling per document. URIs that are not files, or
/// that do not exist on disk, come back unchanged.
pub(crate) fn canonical_file_uri(uri: Url) -> Url {
    file_uri_to_path(&uri)
        .and_then(|path| std::fs::canonicalize(path).ok())
        .and_then(|path| Url::from_file_path(path).ok())
        .unwrap_or(uri)
}
