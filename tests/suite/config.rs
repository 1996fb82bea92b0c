//! Config file to finished session.

use probe_config::ProbeConfig;
use probe_lsp::Harness;

use crate::common::{Workspace, mock_lsp};

#[tokio::test]
async fn session_runs_from_config_file() {
    let ws = Workspace::with_files(&[("src/main.r", "print(1)\n")]);
    let uri = ws.uri("src/main.r");
    let config_path = ws.root().join("lsp-probe.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[server]
command = '{command}'
args = ["--publish", "{uri}=4"]
language_id = "r"

[server.env]
PROBE_MARKER = "${{PROBE_UNSET_FOR_TEST}}set"

[workspace]
root = '{root}'
files = ["src/main.r"]

[initialize.options]
diagnostics = true

[timeouts]
initialize_secs = 5
diagnostics_secs = 5
poll_interval_ms = 20
settle_ms = 0
shutdown_grace_ms = 500
exit_secs = 2

[stderr]
echo_keywords = ["received"]
"#,
            command = mock_lsp(),
            root = ws.root().display(),
        ),
    )
    .unwrap();

    let config = ProbeConfig::load(Some(&config_path))
        .unwrap()
        .into_harness_config()
        .unwrap();
    assert_eq!(config.server.env.get("PROBE_MARKER").map(String::as_str), Some("set"));
    assert_eq!(
        config.initialization_options,
        Some(serde_json::json!({"diagnostics": true}))
    );

    let report = Harness::new(config).run().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].0, uri);
    assert_eq!(report.diagnostics[0].1.count, 4);
}
