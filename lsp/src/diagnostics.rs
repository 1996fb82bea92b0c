//! Diagnostics aggregation for the publish-diagnostics wait.

use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::protocol::{self, PublishDiagnosticsParams};
use crate::types::DiagnosticsObservation;

/// Fold step for `textDocument/publishDiagnostics`: the document URI keys an
/// observation of how many diagnostics arrived and when. File URIs are
/// canonicalized to match the keys the harness opened.
pub(crate) fn observe(
    params: Option<&Value>,
    origin: Instant,
) -> Option<(Url, DiagnosticsObservation)> {
    let params = match PublishDiagnosticsParams::deserialize(params?) {
        Ok(params) => params,
        Err(e) => {
            tracing::debug!("malformed publishDiagnostics params: {e}");
            return None;
        }
    };
    let uri = match Url::parse(&params.uri) {
        Ok(uri) => protocol::canonical_file_uri(uri),
        Err(e) => {
            tracing::debug!("publishDiagnostics for unparseable URI {:?}: {e}", params.uri);
            return None;
        }
    };
    let observation = DiagnosticsObservation {
        count: params.diagnostics.len(),
        received_at: origin.elapsed(),
    };
    tracing::info!(
        uri = %uri,
        count = observation.count,
        "diagnostics received"
    );
    Some((uri, observation))
}

/// Short display name for a document: the file name when the URI is a file
/// path, else the last path segment, else the whole URI.
#[must_use]
pub fn document_label(uri: &Url) -> String {
    if let Some(name) = protocol::file_uri_to_path(uri)
        .as_deref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
    {
        return name.to_string();
    }
    uri.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map_or_else(|| uri.to_string(), str::to_string)
}
