//! Simulated serial bus
//!
//! [`SimulatedBus`] stands in for the host's serial subsystem: it lists its
//! devices like a port source and opens links to them like a port opener.
//! Every open and every close (drop of a [`SimulatedLink`]) is counted, per
//! bus and per device.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mctc_detect::{ConnectionParameters, PortOpener, PortSource, ProbeLink};
use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};
use tracing::{debug, trace};

use crate::device::{Behavior, SimulatedDevice};

/// Open/close counters shared by every link of a bus
#[derive(Debug, Default)]
pub struct LinkStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl LinkStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Links opened but not yet dropped
    pub fn open_links(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }
}

/// What happened on one device across all its links
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTranscript {
    pub opens: usize,
    pub closes: usize,
    /// Every byte written to the device
    pub written: Vec<u8>,
    /// Buffers were discarded before the first write of each link
    pub discarded_before_write: bool,
}

type Transcripts = Arc<Mutex<HashMap<String, DeviceTranscript>>>;

fn lock(transcripts: &Transcripts) -> MutexGuard<'_, HashMap<String, DeviceTranscript>> {
    // A faulting device panics while no guard is held, so poisoning is benign.
    transcripts.lock().unwrap_or_else(|e| e.into_inner())
}

/// A collection of simulated devices
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    devices: Vec<SimulatedDevice>,
    stats: Arc<LinkStats>,
    transcripts: Transcripts,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device; enumeration reports devices in attach order
    pub fn with_device(mut self, device: SimulatedDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Transcript for one device, if it was ever opened
    pub fn transcript(&self, device_id: &str) -> Option<DeviceTranscript> {
        lock(&self.transcripts).get(device_id).cloned()
    }

    fn device(&self, device_id: &str) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}

impl PortSource for SimulatedBus {
    fn list(&self) -> Result<Vec<SerialPortInfo>, serialport::Error> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(idx, device)| SerialPortInfo {
                port_name: device.device_id.clone(),
                port_type: SerialPortType::UsbPort(UsbPortInfo {
                    vid: 0x1209,
                    pid: 0x4D43,
                    serial_number: Some(format!("SIM{:04}", idx)),
                    manufacturer: Some("mctc-sim".to_string()),
                    product: Some(device.description.clone()),
                }),
            })
            .collect())
    }
}

impl PortOpener for SimulatedBus {
    type Link = SimulatedLink;

    fn open(
        &self,
        device_id: &str,
        params: &ConnectionParameters,
    ) -> Result<Self::Link, serialport::Error> {
        let device = self.device(device_id).ok_or_else(|| {
            serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                format!("{}: no such device", device_id),
            )
        })?;

        if let Behavior::RefuseOpen(failure) = &device.behavior {
            debug!("{} refuses to open ({:?})", device_id, failure);
            return Err(failure.to_error(device_id));
        }

        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        {
            let mut transcripts = lock(&self.transcripts);
            let transcript = transcripts.entry(device_id.to_string()).or_default();
            transcript.opens += 1;
            transcript.discarded_before_write = false;
        }
        debug!("{} opened at {} baud", device_id, params.baud_rate);

        Ok(SimulatedLink {
            device: device.clone(),
            input: device.stale_input.iter().copied().collect(),
            line: Vec::new(),
            reply_at: None,
            read_timeout: params.response_timeout,
            discarded: false,
            wrote: false,
            stats: Arc::clone(&self.stats),
            transcripts: Arc::clone(&self.transcripts),
        })
    }
}

/// An open link to a simulated device; dropping it closes the port
#[derive(Debug)]
pub struct SimulatedLink {
    device: SimulatedDevice,
    /// Bytes the device has sent that have not been read
    input: VecDeque<u8>,
    /// Partial query line received so far
    line: Vec<u8>,
    /// When the pending reply becomes readable
    reply_at: Option<Instant>,
    read_timeout: Duration,
    discarded: bool,
    wrote: bool,
    stats: Arc<LinkStats>,
    transcripts: Transcripts,
}

impl SimulatedLink {
    fn release_reply(&mut self) {
        if let Some(at) = self.reply_at {
            if Instant::now() >= at {
                self.reply_at = None;
                if let Behavior::Reply(bytes) = &self.device.behavior {
                    self.input.extend(bytes.iter().copied());
                }
            }
        }
    }

    fn fault(&self) {
        if let Behavior::Fault(message) = &self.device.behavior {
            panic!("{}", message);
        }
    }
}

impl Read for SimulatedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fault();
        if self.device.behavior == Behavior::FailRead {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device disconnected",
            ));
        }

        let deadline = Instant::now() + self.read_timeout;
        self.release_reply();
        if self.input.is_empty() {
            let wake = match self.reply_at {
                Some(at) if at < deadline => at,
                _ => deadline,
            };
            std::thread::sleep(wake.saturating_duration_since(Instant::now()));
            self.release_reply();
        }

        if self.input.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }

        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        trace!("{} delivered {} byte(s)", self.device.device_id, n);
        Ok(n)
    }
}

impl Write for SimulatedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fault();
        {
            let mut transcripts = lock(&self.transcripts);
            let transcript = transcripts
                .entry(self.device.device_id.clone())
                .or_default();
            if !self.wrote {
                transcript.discarded_before_write = self.discarded;
            }
            if self.device.behavior != Behavior::FailWrite {
                transcript.written.extend_from_slice(buf);
            }
        }
        self.wrote = true;

        if self.device.behavior == Behavior::FailWrite {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to device failed",
            ));
        }

        for &byte in buf {
            self.line.push(byte);
            if byte == b'\n' {
                self.line.clear();
                if matches!(self.device.behavior, Behavior::Reply(_)) {
                    self.reply_at = Some(Instant::now() + self.device.reply_delay);
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ProbeLink for SimulatedLink {
    fn discard_buffers(&mut self) -> io::Result<()> {
        self.input.clear();
        self.line.clear();
        self.discarded = true;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(transcript) = lock(&self.transcripts).get_mut(&self.device.device_id) {
            transcript.closes += 1;
        }
        debug!("{} closed", self.device.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::OpenFailure;

    fn params() -> ConnectionParameters {
        ConnectionParameters::default().with_response_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_reply_follows_complete_query() {
        let bus = SimulatedBus::new().with_device(SimulatedDevice::answering("SIM0", "ID"));
        let mut link = bus.open("SIM0", &params()).unwrap();

        link.write_all(b"*IDN?").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            link.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );

        link.write_all(b"\r\n").unwrap();
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ID\r\n");
    }

    #[test]
    fn test_stale_input_is_readable_until_discarded() {
        let device = SimulatedDevice::silent("SIM0").with_stale_input(b"junk\n".to_vec());
        let bus = SimulatedBus::new().with_device(device);

        let mut link = bus.open("SIM0", &params()).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(link.read(&mut buf).unwrap(), 5);
        drop(link);

        let mut link = bus.open("SIM0", &params()).unwrap();
        link.discard_buffers().unwrap();
        assert!(link.read(&mut buf).is_err());
    }

    #[test]
    fn test_drop_counts_close() {
        let bus = SimulatedBus::new().with_device(SimulatedDevice::silent("SIM0"));
        {
            let _link = bus.open("SIM0", &params()).unwrap();
            assert_eq!(bus.stats().open_links(), 1);
        }
        assert_eq!(bus.stats().opens(), 1);
        assert_eq!(bus.stats().closes(), 1);

        let transcript = bus.transcript("SIM0").unwrap();
        assert_eq!((transcript.opens, transcript.closes), (1, 1));
    }

    #[test]
    fn test_refused_open_is_not_counted() {
        let bus = SimulatedBus::new().with_device(SimulatedDevice::refusing("SIM0", OpenFailure::Busy));
        assert!(bus.open("SIM0", &params()).is_err());
        assert!(bus.open("SIM9", &params()).is_err());
        assert_eq!(bus.stats().opens(), 0);
        assert!(bus.transcript("SIM0").is_none());
    }

    #[test]
    fn test_lists_devices_in_attach_order() {
        let bus = SimulatedBus::new()
            .with_device(SimulatedDevice::silent("SIM-B"))
            .with_device(SimulatedDevice::silent("SIM-A"));
        let names: Vec<_> = bus.list().unwrap().into_iter().map(|p| p.port_name).collect();
        assert_eq!(names, vec!["SIM-B", "SIM-A"]);
    }
}
