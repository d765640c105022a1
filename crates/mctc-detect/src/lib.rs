//! MCTC Serial Port Detection Library
//!
//! This crate enumerates serial ports and checks whether the device behind
//! each one answers a `*IDN?` identification query.
//!
//! # Example
//!
//! ```rust,no_run
//! use mctc_detect::{PortScanner, TestRunner};
//!
//! let ports = PortScanner::new().enumerate_ports().unwrap();
//! let run = TestRunner::new().probe_all(&ports);
//!
//! for (port, result) in run.entries() {
//!     println!("{}: {}", port.device_id, result.kind);
//! }
//! ```

pub mod error;
pub mod probe;
pub mod runner;
pub mod scanner;

pub use error::{DetectError, ProbeStage};
pub use probe::{
    classify_response, probe_port, ConnectionParameters, ConnectionProber, OutcomeKind,
    PortOpener, ProbeLink, ProbeResult, SystemPorts, IDN_QUERY,
};
pub use runner::{CancelFlag, RunSummary, RunnerConfig, TestRun, TestRunner};
pub use scanner::{PortDescriptor, PortKind, PortScanner, PortSource, ScannerConfig, SystemPortSource};
