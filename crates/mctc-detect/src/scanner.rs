//! Serial port scanner
//!
//! This module provides serial port enumeration. Every call queries the
//! host afresh, so a rescan reflects devices plugged or unplugged since the
//! previous one.

use serde::Serialize;
use serialport::{available_ports, SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;

/// Width the description is cut to in one-line labels
pub const DESCRIPTION_DISPLAY_WIDTH: usize = 40;

/// Kind of hardware behind a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortKind {
    Usb {
        vid: u16,
        pid: u16,
        serial_number: Option<String>,
        manufacturer: Option<String>,
    },
    Pci,
    Bluetooth,
    Unknown,
}

/// A serial port found during one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub device_id: String,
    /// Human-readable description, never truncated
    pub description: String,
    /// Hardware kind reported by the platform
    pub kind: PortKind,
}

impl PortDescriptor {
    /// Create a descriptor with no hardware details
    pub fn new(device_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            description: description.into(),
            kind: PortKind::Unknown,
        }
    }

    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                device_id: name,
                description: usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "USB serial device".to_string()),
                kind: PortKind::Usb {
                    vid: usb.vid,
                    pid: usb.pid,
                    serial_number: usb.serial_number.clone(),
                    manufacturer: usb.manufacturer.clone(),
                },
            },
            SerialPortType::PciPort => Self {
                device_id: name,
                description: "PCI serial port".to_string(),
                kind: PortKind::Pci,
            },
            SerialPortType::BluetoothPort => Self {
                device_id: name,
                description: "Bluetooth serial port".to_string(),
                kind: PortKind::Bluetooth,
            },
            SerialPortType::Unknown => Self {
                device_id: name,
                description: "n/a".to_string(),
                kind: PortKind::Unknown,
            },
        }
    }

    /// Description cut to the display width, on a character boundary
    pub fn short_description(&self) -> &str {
        match self.description.char_indices().nth(DESCRIPTION_DISPLAY_WIDTH) {
            Some((idx, _)) => &self.description[..idx],
            None => &self.description,
        }
    }

    /// One-line label, e.g. "/dev/ttyUSB0 (FT232R USB UART)"
    pub fn display_label(&self) -> String {
        if self.description.is_empty() {
            self.device_id.clone()
        } else {
            format!("{} ({})", self.device_id, self.short_description())
        }
    }
}

/// Where the scanner gets its raw port list from
pub trait PortSource {
    fn list(&self) -> Result<Vec<SerialPortInfo>, serialport::Error>;
}

/// The host's serial ports, as reported by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortSource;

impl PortSource for SystemPortSource {
    fn list(&self) -> Result<Vec<SerialPortInfo>, serialport::Error> {
        available_ports()
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports whose name contains any of these patterns
    pub skip_patterns: Vec<String>,
}

/// Serial port scanner
pub struct PortScanner<S = SystemPortSource> {
    source: S,
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a scanner over the host's ports with no filtering
    pub fn new() -> Self {
        Self::with_source(SystemPortSource)
    }
}

impl<S: PortSource> PortScanner<S> {
    /// Create a scanner over a specific port source
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            config: ScannerConfig::default(),
        }
    }

    /// Replace the scanner configuration
    pub fn with_config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Enumerate all available serial ports
    ///
    /// Order is whatever the platform reports; no sorting or deduplication
    /// is applied. No ports is `Ok(vec![])`, a failing platform call is
    /// [`DetectError::EnumerationFailed`].
    pub fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        info!("Enumerating serial ports...");
        let ports = self
            .source
            .list()
            .map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| PortDescriptor::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect();

        if result.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                debug!("  {} - {}", port.device_id, port.description);
            }
        }

        Ok(result)
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &PortDescriptor) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.device_id.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    struct FixedSource(Vec<SerialPortInfo>);

    impl PortSource for FixedSource {
        fn list(&self) -> Result<Vec<SerialPortInfo>, serialport::Error> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    impl PortSource for BrokenSource {
        fn list(&self) -> Result<Vec<SerialPortInfo>, serialport::Error> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "udev unavailable",
            ))
        }
    }

    fn port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type,
        }
    }

    fn ftdi() -> SerialPortType {
        SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("12345".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R".to_string()),
        })
    }

    #[test]
    fn test_descriptor_from_usb() {
        let info = PortDescriptor::from_serialport("/dev/ttyUSB0".to_string(), &ftdi());

        assert_eq!(info.device_id, "/dev/ttyUSB0");
        assert_eq!(info.description, "FT232R");
        match info.kind {
            PortKind::Usb { vid, pid, .. } => {
                assert_eq!(vid, 0x0403);
                assert_eq!(pid, 0x6001);
            }
            other => panic!("expected USB kind, got {:?}", other),
        }
    }

    #[test]
    fn test_usb_description_falls_back_to_manufacturer() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x1A86,
            pid: 0x7523,
            serial_number: None,
            manufacturer: Some("QinHeng".to_string()),
            product: None,
        });
        let info = PortDescriptor::from_serialport("COM4".to_string(), &usb);
        assert_eq!(info.description, "QinHeng");
    }

    #[test]
    fn test_non_usb_descriptions() {
        let pci = PortDescriptor::from_serialport("/dev/ttyS0".into(), &SerialPortType::PciPort);
        assert_eq!(pci.description, "PCI serial port");
        assert_eq!(pci.kind, PortKind::Pci);

        let unknown = PortDescriptor::from_serialport("/dev/ttyS1".into(), &SerialPortType::Unknown);
        assert_eq!(unknown.description, "n/a");
    }

    #[test]
    fn test_enumeration_preserves_platform_order() {
        let scanner = PortScanner::with_source(FixedSource(vec![
            port("/dev/ttyUSB1", ftdi()),
            port("/dev/ttyS0", SerialPortType::PciPort),
            port("/dev/ttyUSB0", ftdi()),
        ]));

        let ids: Vec<_> = scanner
            .enumerate_ports()
            .unwrap()
            .into_iter()
            .map(|p| p.device_id)
            .collect();
        assert_eq!(ids, vec!["/dev/ttyUSB1", "/dev/ttyS0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_enumeration_is_repeatable() {
        let scanner = PortScanner::with_source(FixedSource(vec![
            port("/dev/ttyUSB0", ftdi()),
            port("/dev/ttyS0", SerialPortType::PciPort),
        ]));

        let first = scanner.enumerate_ports().unwrap();
        let second = scanner.enumerate_ports().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_ports_is_not_an_error() {
        let scanner = PortScanner::with_source(FixedSource(Vec::new()));
        assert!(scanner.enumerate_ports().unwrap().is_empty());
    }

    #[test]
    fn test_platform_failure_is_enumeration_error() {
        let scanner = PortScanner::with_source(BrokenSource);
        match scanner.enumerate_ports() {
            Err(DetectError::EnumerationFailed(reason)) => {
                assert!(reason.contains("udev unavailable"))
            }
            other => panic!("expected enumeration failure, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_patterns() {
        let scanner = PortScanner::with_source(FixedSource(vec![
            port("/dev/cu.Bluetooth-Incoming-Port", SerialPortType::BluetoothPort),
            port("/dev/cu.usbserial-1420", ftdi()),
        ]))
        .with_config(ScannerConfig {
            skip_patterns: vec!["Bluetooth".to_string()],
        });

        let ports = scanner.enumerate_ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].device_id, "/dev/cu.usbserial-1420");
    }

    #[test]
    fn test_short_description_only_affects_display() {
        let long = "x".repeat(DESCRIPTION_DISPLAY_WIDTH + 10);
        let port = PortDescriptor::new("COM1", long.clone());
        assert_eq!(port.short_description().len(), DESCRIPTION_DISPLAY_WIDTH);
        assert_eq!(port.description, long);
        assert_eq!(PortDescriptor::new("COM2", "").display_label(), "COM2");
    }
}
