//! Command handlers
//!
//! Probing is blocking, so it runs on tokio's blocking pool while the async
//! side waits for either the result or Ctrl-C.

use std::process::ExitCode;

use anyhow::Context;
use mctc_detect::{
    CancelFlag, DetectError, OutcomeKind, PortDescriptor, PortOpener, PortScanner, PortSource,
    TestRunner,
};
use mctc_sim::{OpenFailure, SimulatedBus, SimulatedDevice};
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::{ProbeArgs, ScanArgs};
use crate::report;

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every probed port answered
    Passed,
    /// At least one port did not answer, or there was nothing to test
    Failed,
    /// The port list could not be read
    EnumerationFailed,
    /// Ctrl-C
    Interrupted,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Passed => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::from(1),
            Outcome::EnumerationFailed => ExitCode::from(2),
            Outcome::Interrupted => ExitCode::from(130),
        }
    }
}

/// Problems selecting a port from user input
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("invalid port number {number}: {available} port(s) available")]
    InvalidPortNumber { number: usize, available: usize },

    #[error("no port given")]
    Empty,
}

/// Turn a list number or a port name into a device id
///
/// Numbers are 1-based positions in `ports`; anything else is taken as a
/// port name as-is, so ports missing from the list can still be tested.
pub fn select_port(choice: &str, ports: &[PortDescriptor]) -> Result<String, SelectError> {
    let choice = choice.trim();
    if choice.is_empty() {
        return Err(SelectError::Empty);
    }
    if !choice.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(choice.to_string());
    }

    let invalid = || SelectError::InvalidPortNumber {
        number: choice.parse().unwrap_or(usize::MAX),
        available: ports.len(),
    };
    let number: usize = choice.parse().map_err(|_| invalid())?;
    number
        .checked_sub(1)
        .and_then(|idx| ports.get(idx))
        .map(|port| port.device_id.clone())
        .ok_or_else(invalid)
}

/// Built-in bus for `demo`
pub fn demo_bus() -> SimulatedBus {
    SimulatedBus::new()
        .with_device(
            SimulatedDevice::answering("SIM-MCTC", "MCTC-MIB-A,SN0042,FW1.4")
                .with_description("MCTC-MIB-A (simulated)"),
        )
        .with_device(
            SimulatedDevice::refusing("SIM-BUSY", OpenFailure::Busy)
                .with_description("Port held by another program"),
        )
        .with_device(
            SimulatedDevice::silent("SIM-QUIET").with_description("Nothing attached"),
        )
}

fn scan<S: PortSource>(source: S, args: &ScanArgs) -> Result<Vec<PortDescriptor>, DetectError> {
    PortScanner::with_source(source)
        .with_config(args.scanner_config())
        .enumerate_ports()
}

fn report_enumeration_error(err: &DetectError) -> Outcome {
    warn!("{}", err);
    eprintln!("Error: {}", err);
    Outcome::EnumerationFailed
}

/// `list`
pub fn list<S: PortSource>(source: S, args: &ScanArgs, json: bool) -> anyhow::Result<Outcome> {
    let ports = match scan(source, args) {
        Ok(ports) => ports,
        Err(err) => return Ok(report_enumeration_error(&err)),
    };

    if json {
        println!("{}", report::ports_json(&ports)?);
    } else {
        print!("{}", report::port_table(&ports));
    }
    Ok(Outcome::Passed)
}

/// `test <PORT>`
pub async fn test_one<S, O>(
    source: S,
    opener: O,
    choice: &str,
    scan_args: &ScanArgs,
    probe_args: &ProbeArgs,
    json: bool,
) -> anyhow::Result<Outcome>
where
    S: PortSource,
    O: PortOpener + Send + 'static,
{
    // Names don't need a scan; numbers do
    let ports = if choice.trim().bytes().all(|b| b.is_ascii_digit()) {
        match scan(source, scan_args) {
            Ok(ports) => ports,
            Err(err) => return Ok(report_enumeration_error(&err)),
        }
    } else {
        Vec::new()
    };
    let device_id = select_port(choice, &ports)?;

    let runner = TestRunner::with_opener(
        opener,
        probe_args.connection_parameters(),
        probe_args.runner_config(),
    );
    info!("Testing {}", device_id);

    let Some(result) = run_interruptible(move |_| runner.probe_one(&device_id)).await? else {
        return Ok(Outcome::Interrupted);
    };

    if json {
        println!("{}", report::probe_json(&result)?);
    } else {
        print!("{}", report::probe_text(&result));
    }

    Ok(if result.kind == OutcomeKind::Success {
        Outcome::Passed
    } else {
        Outcome::Failed
    })
}

/// `test-all` and `demo`
pub async fn test_all<S, O>(
    source: S,
    opener: O,
    scan_args: &ScanArgs,
    probe_args: &ProbeArgs,
    json: bool,
) -> anyhow::Result<Outcome>
where
    S: PortSource,
    O: PortOpener + Send + 'static,
{
    let ports = match scan(source, scan_args) {
        Ok(ports) => ports,
        Err(err) => return Ok(report_enumeration_error(&err)),
    };
    if ports.is_empty() {
        if json {
            println!("{}", report::ports_json(&ports)?);
        } else {
            print!("{}", report::port_table(&ports));
        }
        return Ok(Outcome::Failed);
    }
    if !json {
        print!("{}", report::port_table(&ports));
        println!();
    }

    let runner = TestRunner::with_opener(
        opener,
        probe_args.connection_parameters(),
        probe_args.runner_config(),
    );
    let outcome = run_interruptible(move |cancel| runner.probe_all_until(&ports, &cancel)).await?;
    let run = match outcome {
        None | Some(Err(DetectError::Cancelled { .. })) => return Ok(Outcome::Interrupted),
        Some(Err(err)) => return Err(err.into()),
        Some(Ok(run)) => run,
    };

    if json {
        println!("{}", report::run_json(&run)?);
    } else {
        print!("{}", report::run_text(&run));
    }

    Ok(if run.all_succeeded() {
        Outcome::Passed
    } else {
        Outcome::Failed
    })
}

/// Run blocking probe work, racing it against Ctrl-C
///
/// Returns `None` when interrupted; the cancel flag handed to `job` is
/// raised so a batch stops before its next port.
async fn run_interruptible<T, F>(job: F) -> anyhow::Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce(CancelFlag) -> T + Send + 'static,
{
    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || job(worker_cancel));

    tokio::select! {
        joined = handle => Ok(Some(joined.context("probe task failed")?)),
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            warn!("Interrupted, abandoning test run");
            eprintln!("\nInterrupted.");
            Ok(None)
        }
    }
}
