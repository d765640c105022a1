//! Simulated device definitions
//!
//! A [`SimulatedDevice`] describes how the thing at the end of a port
//! behaves when the prober talks to it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a simulated port refuses to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenFailure {
    /// Another process holds the port
    Busy,
    PermissionDenied,
    /// Device was unplugged
    NoDevice,
    /// Platform error the backend leaves unclassified (ENOTTY, EIO, ...)
    Unknown,
}

impl OpenFailure {
    pub fn to_error(self, device_id: &str) -> serialport::Error {
        use serialport::ErrorKind;

        let (kind, what) = match self {
            // EBUSY is not mapped by the POSIX backend
            OpenFailure::Busy => (ErrorKind::Unknown, "Device or resource busy"),
            OpenFailure::PermissionDenied => (
                ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
                "permission denied",
            ),
            OpenFailure::NoDevice => (ErrorKind::NoDevice, "no such device"),
            OpenFailure::Unknown => (ErrorKind::Unknown, "unknown platform error"),
        };
        serialport::Error::new(kind, format!("{}: {}", device_id, what))
    }
}

/// What a device does once the port is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Send these bytes after each complete query line
    Reply(Vec<u8>),
    /// Never send anything
    Silent,
    /// Fail to open
    RefuseOpen(OpenFailure),
    /// Open, but fail when the query is written
    FailWrite,
    /// Open and accept the query, then fail the read (cable pulled)
    FailRead,
    /// Panic inside the transport during the exchange
    Fault(String),
}

/// A device attached to a simulated port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Port name the device is reachable at
    pub device_id: String,
    /// Description reported during enumeration
    pub description: String,
    pub behavior: Behavior,
    /// Bytes already waiting in the input buffer when the port opens
    #[serde(default)]
    pub stale_input: Vec<u8>,
    /// Time between receiving the query and the reply being readable
    #[serde(default)]
    pub reply_delay: Duration,
}

impl SimulatedDevice {
    pub fn new(device_id: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            device_id: device_id.into(),
            description: "Simulated serial device".to_string(),
            behavior,
            stale_input: Vec::new(),
            reply_delay: Duration::ZERO,
        }
    }

    /// Device that answers the query with `text` followed by CRLF
    pub fn answering(device_id: impl Into<String>, text: &str) -> Self {
        Self::new(device_id, Behavior::Reply(format!("{}\r\n", text).into_bytes()))
    }

    /// Device that answers with exactly `bytes`
    pub fn replying_bytes(device_id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(device_id, Behavior::Reply(bytes.into()))
    }

    pub fn silent(device_id: impl Into<String>) -> Self {
        Self::new(device_id, Behavior::Silent)
    }

    pub fn refusing(device_id: impl Into<String>, failure: OpenFailure) -> Self {
        Self::new(device_id, Behavior::RefuseOpen(failure))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_stale_input(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stale_input = bytes.into();
        self
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}
