//! Command-line argument definitions

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use mctc_detect::{ConnectionParameters, RunnerConfig, ScannerConfig};

/// Serial & USB port connection tester for MCTC-MIB-A boards
#[derive(Debug, Parser)]
#[command(name = "mctc-tester")]
#[command(about = "Find serial ports and check that the attached device answers *IDN?")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List available serial ports
    List(ScanArgs),
    /// Test one port, by list number or by name
    Test {
        /// 1-based number from `list`, or a port name such as COM3 or /dev/ttyUSB0
        port: String,
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Test every available port in order
    TestAll {
        #[command(flatten)]
        scan: ScanArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Test a built-in set of simulated ports
    Demo {
        #[command(flatten)]
        probe: ProbeArgs,
    },
}

/// Port enumeration options
#[derive(Debug, Clone, Default, Args)]
pub struct ScanArgs {
    /// Skip ports whose name contains this text (repeatable)
    #[arg(long = "skip", value_name = "PATTERN")]
    pub skip: Vec<String>,
}

impl ScanArgs {
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            skip_patterns: self.skip.clone(),
        }
    }
}

/// Serial settings and pacing for probes
#[derive(Debug, Clone, Args)]
pub struct ProbeArgs {
    /// Baud rate
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,

    /// How long to wait for a reply, in milliseconds
    #[arg(long = "timeout-ms", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Pause between sending the query and reading, in milliseconds
    #[arg(long = "settle-ms", default_value_t = 500)]
    pub settle_ms: u64,

    /// Pause between ports when testing several, in milliseconds
    #[arg(long = "delay-ms", default_value_t = 1000)]
    pub delay_ms: u64,
}

impl ProbeArgs {
    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters::default()
            .with_baud_rate(self.baud)
            .with_response_timeout(Duration::from_millis(self.timeout_ms))
            .with_settle_delay(Duration::from_millis(self.settle_ms))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            inter_probe_delay: Duration::from_millis(self.delay_ms),
        }
    }
}
