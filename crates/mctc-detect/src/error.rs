//! Error types for port detection and probing

use thiserror::Error;

use crate::probe::OutcomeKind;

/// Step of the probe exchange an I/O failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Flush,
    Write,
    Read,
}

impl std::fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProbeStage::Flush => "flush",
            ProbeStage::Write => "write",
            ProbeStage::Read => "read",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during detection
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Probe requested without a device identifier
    #[error("device identifier is empty")]
    EmptyDeviceId,

    /// Failed to open serial port
    #[error("failed to open port {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// I/O error during probe
    #[error("I/O error on {port} during {stage}: {source}")]
    Io {
        port: String,
        stage: ProbeStage,
        #[source]
        source: std::io::Error,
    },

    /// Failure that does not fit the transport taxonomy
    #[error("unexpected failure on {port}: {reason}")]
    Unexpected { port: String, reason: String },

    /// Run aborted by the caller before all ports were probed
    #[error("test run cancelled after {completed} port(s)")]
    Cancelled { completed: usize },
}

impl DetectError {
    /// Outcome a probe reports when it stops with this error
    pub fn outcome_kind(&self) -> OutcomeKind {
        match self {
            DetectError::EmptyDeviceId | DetectError::OpenFailed { .. } | DetectError::Io { .. } => {
                OutcomeKind::PortError
            }
            DetectError::Unexpected { .. }
            | DetectError::EnumerationFailed(_)
            | DetectError::Cancelled { .. } => OutcomeKind::UnknownError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failures_are_port_errors() {
        let err = DetectError::OpenFailed {
            port: "/dev/ttyUSB9".into(),
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        };
        assert_eq!(err.outcome_kind(), OutcomeKind::PortError);

        let err = DetectError::OpenFailed {
            port: "/dev/ttyUSB9".into(),
            source: serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
                "denied",
            ),
        };
        assert_eq!(err.outcome_kind(), OutcomeKind::PortError);
    }

    #[test]
    fn test_unclassified_open_failure_is_port_error() {
        // serialport reports EBUSY, ENOTTY and friends as ErrorKind::Unknown
        let err = DetectError::OpenFailed {
            port: "/dev/ttyUSB0".into(),
            source: serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "Device or resource busy",
            ),
        };
        assert_eq!(err.outcome_kind(), OutcomeKind::PortError);
    }

    #[test]
    fn test_unexpected_is_unknown() {
        let err = DetectError::Unexpected {
            port: "COM3".into(),
            reason: "panic during probe".into(),
        };
        assert_eq!(err.outcome_kind(), OutcomeKind::UnknownError);
    }

    #[test]
    fn test_io_error_message_names_stage() {
        let err = DetectError::Io {
            port: "COM3".into(),
            stage: ProbeStage::Write,
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert_eq!(err.outcome_kind(), OutcomeKind::PortError);
        assert!(err.to_string().contains("during write"));
    }
}
