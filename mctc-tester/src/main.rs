//! MCTC Connection Tester
//!
//! Lists the serial ports on this machine and checks whether the device on
//! each one answers a `*IDN?` identification query.

mod cli;
mod commands;
mod report;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use mctc_detect::{SystemPortSource, SystemPorts};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, ScanArgs};
use commands::Outcome;

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mctc_tester={level},mctc_detect={level},mctc_sim={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> anyhow::Result<Outcome> {
    match cli.command {
        Command::List(scan) => commands::list(SystemPortSource, &scan, cli.json),
        Command::Test { port, scan, probe } => {
            commands::test_one(SystemPortSource, SystemPorts, &port, &scan, &probe, cli.json).await
        }
        Command::TestAll { scan, probe } => {
            commands::test_all(SystemPortSource, SystemPorts, &scan, &probe, cli.json).await
        }
        Command::Demo { probe } => {
            let bus = commands::demo_bus();
            commands::test_all(bus.clone(), bus, &ScanArgs::default(), &probe, cli.json).await
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Starting MCTC connection tester");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(dispatch(cli));
    // An interrupted probe may still be sleeping on the blocking pool
    runtime.shutdown_timeout(Duration::from_millis(100));

    match outcome {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
