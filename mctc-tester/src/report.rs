//! Text and JSON rendering of ports and probe results

use std::fmt::Write as _;

use mctc_detect::{OutcomeKind, PortDescriptor, ProbeResult, RunSummary, TestRun};
use serde::Serialize;

const RULE_WIDTH: usize = 60;

/// Caller-facing shape of one probed port
#[derive(Debug, Serialize)]
pub struct ProbeReport<'a> {
    pub device_id: &'a str,
    pub outcome: OutcomeKind,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    pub elapsed_ms: u64,
}

impl<'a> From<&'a ProbeResult> for ProbeReport<'a> {
    fn from(result: &'a ProbeResult) -> Self {
        Self {
            device_id: &result.device_id,
            outcome: result.kind,
            text: &result.text,
            error: result.error.as_deref(),
            elapsed_ms: result.elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    results: Vec<ProbeReport<'a>>,
    summary: RunSummary,
}

/// Numbered table of ports
pub fn port_table(ports: &[PortDescriptor]) -> String {
    if ports.is_empty() {
        return "No serial ports found!\n  - Check USB cables\n  - Verify drivers are installed\n  - Try rescanning\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "Found {} port(s)", ports.len());
    let _ = writeln!(out, "{:>4}  {:<20}  Description", "#", "Port");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH + 12));
    for (idx, port) in ports.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:<20}  {}",
            idx + 1,
            port.device_id,
            port.short_description()
        );
    }
    out
}

/// Human-readable account of one probe
pub fn probe_text(result: &ProbeResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Testing {}", result.device_id);
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    match result.kind {
        OutcomeKind::Success => {
            let _ = writeln!(out, "Received: {}", result.text);
            let _ = writeln!(out, "SUCCESS: Device responded!");
        }
        OutcomeKind::EmptyResponse => {
            let _ = writeln!(out, "WARNING: Empty response");
        }
        OutcomeKind::NoResponse => {
            let _ = writeln!(out, "ERROR: No response");
        }
        OutcomeKind::DecodeError => {
            let _ = writeln!(out, "ERROR: Response is not text: {:02X?}", result.response);
        }
        OutcomeKind::PortError => {
            let _ = writeln!(
                out,
                "PORT ERROR: {}",
                result.error.as_deref().unwrap_or("unknown")
            );
        }
        OutcomeKind::UnknownError => {
            let _ = writeln!(
                out,
                "UNEXPECTED ERROR: {}",
                result.error.as_deref().unwrap_or("unknown")
            );
        }
    }
    out
}

/// Per-port results followed by the SUCCESS/FAILED tally
pub fn run_text(run: &TestRun) -> String {
    let mut out = String::new();
    for result in run.results() {
        out.push_str(&probe_text(result));
        out.push('\n');
    }

    let _ = writeln!(out, "TEST SUMMARY:");
    let _ = writeln!(out, "{}", "-".repeat(40));
    for result in run.results() {
        let status = if result.is_success() { "SUCCESS" } else { "FAILED" };
        let _ = writeln!(out, "{:<15} : {}", result.device_id, status);
    }
    let summary = run.summary();
    let _ = writeln!(
        out,
        "{} of {} port(s) responded",
        summary.succeeded, summary.total
    );
    out
}

pub fn ports_json(ports: &[PortDescriptor]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(ports)
}

pub fn probe_json(result: &ProbeResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&ProbeReport::from(result))
}

pub fn run_json(run: &TestRun) -> serde_json::Result<String> {
    let report = RunReport {
        results: run.results().map(ProbeReport::from).collect(),
        summary: run.summary(),
    };
    serde_json::to_string_pretty(&report)
}
