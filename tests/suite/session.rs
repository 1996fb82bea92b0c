//! Full sessions against `mock-lsp`.

use std::time::{Duration, Instant};

use probe_lsp::{ExitOutcome, Harness, HarnessError, SessionState, TransportError, WaitStatus};

use crate::common::Workspace;

fn lines(report: &probe_lsp::RunReport) -> Vec<&str> {
    report.stderr.iter().map(|r| r.line.as_str()).collect()
}

#[tokio::test]
async fn publishes_for_two_documents_complete_the_wait() {
    let ws = Workspace::with_files(&[("R/a.r", "x <- 1\n"), ("R/b.r", "y <- )\n")]);
    let mut args = Vec::new();
    args.extend(ws.publish_arg("R/a.r", 0));
    args.extend(ws.publish_arg("R/b.r", 3));

    let report = Harness::new(ws.config(&args, &["R/a.r", "R/b.r"]))
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.wait, WaitStatus::Satisfied);
    assert!(report.missing.is_empty());

    let count = |name: &str| {
        report
            .diagnostics
            .iter()
            .find(|(uri, _)| *uri == ws.uri(name))
            .map(|(_, obs)| obs.count)
    };
    assert_eq!(count("R/a.r"), Some(0));
    assert_eq!(count("R/b.r"), Some(3));

    let m = &report.milestones;
    assert!(m.initialize_sent <= m.initialize_response);
    assert!(m.initialize_response <= m.initialized_sent);
    assert_eq!(m.opened.len(), 2);
    assert!(m.first_diagnostics.is_some());
    assert!(m.all_diagnostics.is_some());
    assert!(m.shutdown_complete >= m.all_diagnostics);

    assert_eq!(report.shutdown.from, SessionState::Ready);
    assert!(report.shutdown.acknowledged);
    assert!(matches!(
        report.shutdown.exit,
        ExitOutcome::Exited(status) if status.success()
    ));
}

#[tokio::test]
async fn diagnostics_published_on_open() {
    let ws = Workspace::with_files(&[("collate.r", "f <- function() {}\n")]);
    let report = Harness::new(ws.config(&["--diagnose-on-open", "2"], &["collate.r"]))
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].0, ws.uri("collate.r"));
    assert_eq!(report.diagnostics[0].1.count, 2);
    assert!(lines(&report).contains(&"mock-lsp: received textDocument/didOpen"));
}

#[tokio::test]
async fn timeout_keeps_partial_progress() {
    let ws = Workspace::with_files(&[("a.r", ""), ("b.r", "")]);
    let args = ws.publish_arg("a.r", 1);
    let mut config = ws.config(&args, &["a.r", "b.r"]);
    config.timeouts.diagnostics = Duration::from_millis(300);

    let started = Instant::now();
    let report = Harness::new(config).run().await.unwrap();

    assert_eq!(report.wait, WaitStatus::TimedOut);
    assert!(!report.is_complete());
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].0, ws.uri("a.r"));
    assert_eq!(report.missing, vec![ws.uri("b.r")]);
    assert!(report.milestones.all_diagnostics.is_none());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn unresponsive_shutdown_is_killed_within_bound() {
    let ws = Workspace::with_files(&[]);
    let mut config = ws.config(&["--hang-on", "shutdown", "--ignore-exit"], &[]);
    config.timeouts.diagnostics = Duration::from_millis(100);
    config.timeouts.shutdown_grace = Duration::from_millis(300);
    config.timeouts.exit = Duration::from_millis(500);

    let started = Instant::now();
    let report = Harness::new(config).run().await.unwrap();
    let elapsed = started.elapsed();

    assert!(!report.shutdown.acknowledged);
    assert_eq!(report.shutdown.exit, ExitOutcome::Killed);
    // Observation window with nothing to open still counts as complete.
    assert_eq!(report.wait, WaitStatus::Satisfied);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
}

#[tokio::test]
async fn server_exit_mid_wait_reports_closed() {
    let ws = Workspace::with_files(&[("a.r", "")]);
    let report = Harness::new(ws.config(&["--exit-on", "textDocument/didOpen"], &["a.r"]))
        .run()
        .await
        .unwrap();

    assert_eq!(report.wait, WaitStatus::Closed);
    assert!(!report.is_complete());
    assert_eq!(report.missing, vec![ws.uri("a.r")]);
    assert!(!report.shutdown.acknowledged);
    assert!(matches!(report.shutdown.exit, ExitOutcome::Exited(_)));
}

#[tokio::test]
async fn malformed_frame_fails_the_session() {
    let ws = Workspace::with_files(&[("a.r", "")]);
    let started = Instant::now();
    let err = Harness::new(ws.config(&["--garbage-after-initialized"], &["a.r"]))
        .run()
        .await
        .err()
        .expect("garbage must fail the session");

    assert!(
        matches!(err, HarnessError::Transport(TransportError::Protocol(_))),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn missing_server_binary_is_spawn_failure() {
    let ws = Workspace::with_files(&[]);
    let mut config = ws.config::<&str>(&[], &[]);
    config.server.command = "no-such-language-server-anywhere".to_string();

    let err = Harness::new(config).run().await.err().expect("must fail");
    assert!(matches!(
        err,
        HarnessError::Transport(TransportError::Spawn { .. })
    ));
}

#[tokio::test]
async fn missing_document_fails_before_spawn() {
    let ws = Workspace::with_files(&[]);
    let err = Harness::new(ws.config::<&str>(&[], &["nope.r"]))
        .run()
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, HarnessError::ReadDocument { .. }));
}

#[tokio::test]
async fn stderr_is_captured_in_order() {
    let ws = Workspace::with_files(&[]);
    let mut config = ws.config(
        &[
            "--stderr-line",
            "alpha",
            "--stderr-line",
            "beta",
            "--stderr-line",
            "gamma",
        ],
        &[],
    );
    config.timeouts.diagnostics = Duration::from_millis(100);

    let report = Harness::new(config).run().await.unwrap();

    let lines = lines(&report);
    assert_eq!(&lines[..3], &["alpha", "beta", "gamma"]);
    assert!(lines.contains(&"mock-lsp: received initialize"));
    assert!(lines.contains(&"mock-lsp: received shutdown"));
    assert!(
        report
            .stderr
            .windows(2)
            .all(|pair| pair[0].elapsed <= pair[1].elapsed)
    );
}

#[tokio::test]
async fn interleaved_server_request_is_answered() {
    let ws = Workspace::with_files(&[("a.r", "")]);
    let mut args = vec!["--interleave".to_string()];
    args.extend(ws.publish_arg("a.r", 1));

    let report = Harness::new(ws.config(&args, &["a.r"]))
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    // The reply to workspace/configuration reaches the server.
    assert!(lines(&report).contains(&"mock-lsp: received <response>"));
}

#[tokio::test]
async fn dotted_document_path_matches_canonical_publish() {
    let ws = Workspace::with_files(&[("a.r", "x <- 1\n"), ("sub/keep.r", "")]);
    let args = ["--publish".to_string(), format!("{}=2", ws.uri("a.r"))];

    let report = Harness::new(ws.config(&args, &["sub/../a.r"]))
        .run()
        .await
        .unwrap();

    assert_eq!(report.wait, WaitStatus::Satisfied);
    assert!(report.missing.is_empty());
    assert_eq!(report.diagnostics[0].0, ws.uri("a.r"));
    assert_eq!(report.diagnostics[0].1.count, 2);
}

#[tokio::test]
async fn dotted_publish_matches_canonical_document() {
    let ws = Workspace::with_files(&[("a.r", ""), ("sub/keep.r", "")]);
    let args = [
        "--publish".to_string(),
        format!("{}=1", ws.raw_uri("sub/../a.r")),
    ];

    let report = Harness::new(ws.config(&args, &["a.r"]))
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.diagnostics[0].0, ws.uri("a.r"));
}
