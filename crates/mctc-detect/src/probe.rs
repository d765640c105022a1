//! Identification probing
//!
//! This module opens a serial port, sends the `*IDN?` identification query
//! and classifies whatever comes back. Every failure is caught at the probe
//! boundary and turned into a [`ProbeResult`], so one bad port never aborts
//! a batch.

use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::Serialize;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, info, trace, warn};

use crate::error::{DetectError, ProbeStage};

/// Identification query sent to every device
pub const IDN_QUERY: &[u8] = b"*IDN?\r\n";

/// Upper bound on a single response line
const MAX_LINE_LEN: usize = 4096;

const READ_CHUNK: usize = 64;

/// Serial settings used for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// How long to wait for a response line
    pub response_timeout: Duration,
    /// Pause between sending the query and reading
    pub settle_delay: Duration,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            response_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl ConnectionParameters {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// How a probe ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// Non-empty text reply
    Success,
    /// Reply was only whitespace / line endings
    EmptyResponse,
    /// Nothing arrived before the timeout
    NoResponse,
    /// Reply was not valid text
    DecodeError,
    /// Open, flush, write or read failed at the transport layer
    PortError,
    /// Anything else
    UnknownError,
}

impl OutcomeKind {
    /// All kinds, in report order
    pub const ALL: [OutcomeKind; 6] = [
        OutcomeKind::Success,
        OutcomeKind::EmptyResponse,
        OutcomeKind::NoResponse,
        OutcomeKind::DecodeError,
        OutcomeKind::PortError,
        OutcomeKind::UnknownError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "SUCCESS",
            OutcomeKind::EmptyResponse => "EMPTY_RESPONSE",
            OutcomeKind::NoResponse => "NO_RESPONSE",
            OutcomeKind::DecodeError => "DECODE_ERROR",
            OutcomeKind::PortError => "PORT_ERROR",
            OutcomeKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success)
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Port that was probed
    pub device_id: String,
    /// Classified outcome
    pub kind: OutcomeKind,
    /// Raw bytes of the response line, possibly empty
    pub response: Vec<u8>,
    /// Trimmed reply text; empty unless the reply decoded
    pub text: String,
    /// Transport or unexpected failure message
    pub error: Option<String>,
    /// Wall time spent on the probe
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    fn from_error(device_id: &str, err: &DetectError, elapsed: Duration) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind: err.outcome_kind(),
            response: Vec::new(),
            text: String::new(),
            error: Some(err.to_string()),
            elapsed,
        }
    }
}

/// Classify a response line
///
/// Returns the outcome and the trimmed text (empty when nothing decoded).
pub fn classify_response(response: &[u8]) -> (OutcomeKind, String) {
    if response.is_empty() {
        return (OutcomeKind::NoResponse, String::new());
    }
    match std::str::from_utf8(response) {
        Ok(decoded) => {
            let text = decoded.trim();
            if text.is_empty() {
                (OutcomeKind::EmptyResponse, String::new())
            } else {
                (OutcomeKind::Success, text.to_string())
            }
        }
        Err(_) => (OutcomeKind::DecodeError, String::new()),
    }
}

/// An open serial connection the prober can talk through
///
/// Dropping the link closes it.
pub trait ProbeLink: Read + Write {
    /// Discard anything buffered in either direction
    fn discard_buffers(&mut self) -> io::Result<()>;

    /// Bound the next read call
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl ProbeLink for Box<dyn SerialPort> {
    fn discard_buffers(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Opens links to named devices
pub trait PortOpener {
    type Link: ProbeLink;

    fn open(
        &self,
        device_id: &str,
        params: &ConnectionParameters,
    ) -> Result<Self::Link, serialport::Error>;
}

/// Real serial ports on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    type Link = Box<dyn SerialPort>;

    fn open(
        &self,
        device_id: &str,
        params: &ConnectionParameters,
    ) -> Result<Self::Link, serialport::Error> {
        serialport::new(device_id, params.baud_rate)
            .data_bits(params.data_bits)
            .parity(params.parity)
            .stop_bits(params.stop_bits)
            .timeout(params.response_timeout)
            .open()
    }
}

/// Identification prober
pub struct ConnectionProber<O = SystemPorts> {
    opener: O,
    params: ConnectionParameters,
}

impl ConnectionProber {
    /// Create a prober for real ports with default parameters
    pub fn new() -> Self {
        Self::with_opener(SystemPorts, ConnectionParameters::default())
    }
}

impl Default for ConnectionProber {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PortOpener> ConnectionProber<O> {
    pub fn with_opener(opener: O, params: ConnectionParameters) -> Self {
        Self { opener, params }
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Probe one port
    ///
    /// Never fails: every open, flush, write or read failure comes back as
    /// [`OutcomeKind::PortError`]; a panic in the transport comes back as
    /// [`OutcomeKind::UnknownError`]. The panic hook still runs, so the
    /// panic message is printed to stderr before being caught here.
    pub fn probe(&self, device_id: &str) -> ProbeResult {
        let started = Instant::now();
        debug!("Probing {} at {} baud", device_id, self.params.baud_rate);

        let exchange = panic::catch_unwind(AssertUnwindSafe(|| self.exchange(device_id)));
        let elapsed = started.elapsed();

        let result = match exchange {
            Ok(Ok(response)) => {
                let (kind, text) = classify_response(&response);
                ProbeResult {
                    device_id: device_id.to_string(),
                    kind,
                    response,
                    text,
                    error: None,
                    elapsed,
                }
            }
            Ok(Err(err)) => ProbeResult::from_error(device_id, &err, elapsed),
            Err(payload) => {
                let err = DetectError::Unexpected {
                    port: device_id.to_string(),
                    reason: panic_message(payload.as_ref()),
                };
                ProbeResult::from_error(device_id, &err, elapsed)
            }
        };

        match result.kind {
            OutcomeKind::PortError | OutcomeKind::UnknownError => warn!(
                "{} on {}: {}",
                result.kind,
                device_id,
                result.error.as_deref().unwrap_or("")
            ),
            OutcomeKind::Success => info!("{} identified as {:?}", device_id, result.text),
            kind => info!("{} on {}", kind, device_id),
        }

        result
    }

    /// Open, flush, send, settle, read. The link is dropped on every return.
    fn exchange(&self, device_id: &str) -> Result<Vec<u8>, DetectError> {
        if device_id.is_empty() {
            return Err(DetectError::EmptyDeviceId);
        }

        let mut link = self
            .opener
            .open(device_id, &self.params)
            .map_err(|source| DetectError::OpenFailed {
                port: device_id.to_string(),
                source,
            })?;
        debug!("{} opened", device_id);

        let io_err = |stage| {
            move |source| DetectError::Io {
                port: device_id.to_string(),
                stage,
                source,
            }
        };

        link.discard_buffers().map_err(io_err(ProbeStage::Flush))?;

        trace!("Sending {:?} to {}", String::from_utf8_lossy(IDN_QUERY), device_id);
        link.write_all(IDN_QUERY)
            .and_then(|()| link.flush())
            .map_err(io_err(ProbeStage::Write))?;

        std::thread::sleep(self.params.settle_delay);

        let response =
            read_line(&mut link, self.params.response_timeout).map_err(io_err(ProbeStage::Read))?;
        trace!("{} replied {:02X?}", device_id, response);

        Ok(response)
    }
}

/// Read up to and including the first `\n`, bounded by `timeout`
///
/// A read timeout ends the line with whatever arrived so far.
fn read_line<L: ProbeLink>(link: &mut L, timeout: Duration) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    while line.len() < MAX_LINE_LEN {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        link.set_read_timeout(remaining)?;

        match link.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                    line.extend_from_slice(&chunk[..=pos]);
                    break;
                }
                line.extend_from_slice(&chunk[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    line.truncate(MAX_LINE_LEN);
    Ok(line)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during probe".to_string()
    }
}

/// Probe a specific port with default parameters at a given baud rate
pub fn probe_port(device_id: &str, baud_rate: u32) -> ProbeResult {
    let params = ConnectionParameters::default().with_baud_rate(baud_rate);
    ConnectionProber::with_opener(SystemPorts, params).probe(device_id)
}
