//! Batch testing over several ports
//!
//! Ports are probed one at a time, in the order given. A failing port never
//! stops the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::DetectError;
use crate::probe::{ConnectionParameters, ConnectionProber, PortOpener, ProbeResult, SystemPorts};
use crate::scanner::PortDescriptor;

/// Pacing for batch runs
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pause between consecutive ports
    pub inter_probe_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inter_probe_delay: Duration::from_secs(1),
        }
    }
}

/// Shared flag a caller raises to stop a batch run
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Success tally derived from a [`TestRun`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Probe results in the order the ports were requested
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestRun {
    entries: Vec<(PortDescriptor, ProbeResult)>,
}

impl TestRun {
    pub fn entries(&self) -> &[(PortDescriptor, ProbeResult)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.entries.iter().map(|(_, result)| result)
    }

    pub fn summary(&self) -> RunSummary {
        let succeeded = self.results().filter(|r| r.is_success()).count();
        RunSummary {
            total: self.entries.len(),
            succeeded,
            failed: self.entries.len() - succeeded,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.results().all(|r| r.is_success())
    }
}

/// Runs probes for the single-port and all-ports flows
pub struct TestRunner<O = SystemPorts> {
    prober: ConnectionProber<O>,
    config: RunnerConfig,
}

impl TestRunner {
    /// Runner for real ports with default parameters and pacing
    pub fn new() -> Self {
        Self::with_opener(SystemPorts, ConnectionParameters::default(), RunnerConfig::default())
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PortOpener> TestRunner<O> {
    pub fn with_opener(opener: O, params: ConnectionParameters, config: RunnerConfig) -> Self {
        Self {
            prober: ConnectionProber::with_opener(opener, params),
            config,
        }
    }

    pub fn prober(&self) -> &ConnectionProber<O> {
        &self.prober
    }

    /// Probe a single port by name
    pub fn probe_one(&self, device_id: &str) -> ProbeResult {
        self.prober.probe(device_id)
    }

    /// Probe every port, in order
    pub fn probe_all(&self, ports: &[PortDescriptor]) -> TestRun {
        let mut entries = Vec::with_capacity(ports.len());
        for (idx, port) in ports.iter().enumerate() {
            if idx > 0 {
                std::thread::sleep(self.config.inter_probe_delay);
            }
            entries.push((port.clone(), self.prober.probe(&port.device_id)));
        }

        let run = TestRun { entries };
        log_summary(&run);
        run
    }

    /// Probe every port, in order, stopping if `cancel` is raised
    ///
    /// Cancellation discards the results gathered so far.
    pub fn probe_all_until(
        &self,
        ports: &[PortDescriptor],
        cancel: &CancelFlag,
    ) -> Result<TestRun, DetectError> {
        let mut entries = Vec::with_capacity(ports.len());
        for (idx, port) in ports.iter().enumerate() {
            if idx > 0 {
                std::thread::sleep(self.config.inter_probe_delay);
            }
            if cancel.is_cancelled() {
                debug!("Run cancelled before {}", port.device_id);
                return Err(DetectError::Cancelled { completed: idx });
            }
            entries.push((port.clone(), self.prober.probe(&port.device_id)));
        }

        let run = TestRun { entries };
        log_summary(&run);
        Ok(run)
    }
}

fn log_summary(run: &TestRun) {
    let summary = run.summary();
    info!(
        "Tested {} port(s): {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::OutcomeKind;

    fn result(device_id: &str, kind: OutcomeKind) -> ProbeResult {
        ProbeResult {
            device_id: device_id.to_string(),
            kind,
            response: Vec::new(),
            text: String::new(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_summary_counts_success_against_everything_else() {
        let run = TestRun {
            entries: OutcomeKind::ALL
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    let id = format!("COM{}", i + 1);
                    (PortDescriptor::new(id.clone(), ""), result(&id, *kind))
                })
                .collect(),
        };

        assert_eq!(
            run.summary(),
            RunSummary {
                total: 6,
                succeeded: 1,
                failed: 5
            }
        );
        assert!(!run.all_succeeded());
    }

    #[test]
    fn test_empty_run() {
        let run = TestRunner::new().probe_all(&[]);
        assert!(run.is_empty());
        assert_eq!(run.summary().total, 0);
        assert!(run.all_succeeded());
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let ports = [PortDescriptor::new("/dev/mctc-missing", "")];

        match TestRunner::new().probe_all_until(&ports, &cancel) {
            Err(DetectError::Cancelled { completed }) => assert_eq!(completed, 0),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }
}
