//! Human-readable rendering of a [`RunReport`].

use std::fmt;
use std::time::Duration;

use probe_lsp::{ExitOutcome, RunReport, SessionState, WaitStatus, document_label};

const LABEL_WIDTH: usize = 28;

pub struct Rendered<'a> {
    report: &'a RunReport,
    stderr_lines: usize,
}

impl<'a> Rendered<'a> {
    pub fn new(report: &'a RunReport, stderr_lines: usize) -> Self {
        Self {
            report,
            stderr_lines,
        }
    }

    fn timing(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.report.milestones;
        writeln!(f, "=== TIMING SUMMARY ===")?;
        milestone(f, "spawned", m.spawned)?;
        milestone(f, "initialize sent", m.initialize_sent)?;
        milestone(f, "initialize response", m.initialize_response)?;
        if let (Some(sent), Some(received)) = (m.initialize_sent, m.initialize_response) {
            row(f, "  initialize round trip", &ms(received.saturating_sub(sent)))?;
        }
        milestone(f, "initialized sent", m.initialized_sent)?;
        for (uri, at) in &m.opened {
            row(f, &format!("opened {}", document_label(uri)), &ms(*at))?;
        }
        milestone(f, "first diagnostics", m.first_diagnostics)?;
        milestone(f, "all diagnostics", m.all_diagnostics)?;
        milestone(f, "shutdown complete", m.shutdown_complete)?;

        let wait = match self.report.wait {
            WaitStatus::Satisfied => "complete",
            WaitStatus::TimedOut => "timed out",
            WaitStatus::Closed => "server closed its output",
        };
        row(f, "diagnostics wait", wait)?;

        let shutdown = &self.report.shutdown;
        let exit = match shutdown.exit {
            ExitOutcome::Exited(status) => format!("exited ({status})"),
            ExitOutcome::Killed => String::from("killed"),
            ExitOutcome::Unknown => String::from("unknown"),
        };
        let ack = if shutdown.acknowledged {
            "acknowledged"
        } else {
            "not acknowledged"
        };
        if shutdown.from == SessionState::Ready {
            row(f, "shutdown", &format!("{ack}, {exit}"))
        } else {
            row(
                f,
                "shutdown",
                &format!("{ack}, {exit} (abandoned in {:?})", shutdown.from),
            )
        }
    }

    fn diagnostics(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== DIAGNOSTICS BY FILE ===")?;
        if self.report.diagnostics.is_empty() && self.report.missing.is_empty() {
            return writeln!(f, "  (none received)");
        }
        for (uri, observation) in &self.report.diagnostics {
            let noun = if observation.count == 1 {
                "diagnostic"
            } else {
                "diagnostics"
            };
            row(
                f,
                &document_label(uri),
                &format!(
                    "{} {noun} at {}",
                    observation.count,
                    ms(observation.received_at)
                ),
            )?;
        }
        for uri in &self.report.missing {
            row(f, &document_label(uri), "no diagnostics received")?;
        }
        Ok(())
    }

    fn stderr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = &self.report.stderr;
        if records.len() > self.stderr_lines {
            writeln!(
                f,
                "=== STDERR TIMELINE (first {} of {} lines) ===",
                self.stderr_lines,
                records.len()
            )?;
        } else {
            writeln!(f, "=== STDERR TIMELINE ({} lines) ===", records.len())?;
        }
        for record in records.iter().take(self.stderr_lines) {
            writeln!(f, "  [{:>10}] {}", ms(record.elapsed), record.line)?;
        }
        Ok(())
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.timing(f)?;
        writeln!(f)?;
        self.diagnostics(f)?;
        writeln!(f)?;
        self.stderr(f)
    }
}

fn ms(d: Duration) -> String {
    format!("{:.1} ms", d.as_secs_f64() * 1000.0)
}

fn row(f: &mut fmt::Formatter<'_>, label: &str, value: &str) -> fmt::Result {
    writeln!(f, "  {label:<LABEL_WIDTH$} {value}")
}

fn milestone(f: &mut fmt::Formatter<'_>, label: &str, at: Option<Duration>) -> fmt::Result {
    match at {
        Some(at) => row(f, label, &ms(at)),
        None => row(f, label, "-"),
    }
}
