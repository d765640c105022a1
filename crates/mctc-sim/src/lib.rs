//! MCTC Device Simulation Library
//!
//! This crate provides simulated serial devices for testing the connection
//! prober without physical hardware. It includes:
//!
//! - **SimulatedDevice**: A device that answers, stays silent, or fails in a
//!   chosen way
//! - **SimulatedBus**: A set of devices that acts as both the port list and
//!   the port opener, counting every open and close
//!
//! # Example
//!
//! ```rust
//! use mctc_detect::{ConnectionParameters, ConnectionProber, OutcomeKind};
//! use mctc_sim::{SimulatedBus, SimulatedDevice};
//!
//! let bus = SimulatedBus::new().with_device(SimulatedDevice::answering("SIM0", "MCTC-100"));
//! let params = ConnectionParameters::default().with_settle_delay(std::time::Duration::ZERO);
//! let prober = ConnectionProber::with_opener(bus.clone(), params);
//!
//! let result = prober.probe("SIM0");
//! assert_eq!(result.kind, OutcomeKind::Success);
//! assert_eq!(result.text, "MCTC-100");
//! assert_eq!(bus.stats().opens(), bus.stats().closes());
//! ```

pub mod bus;
pub mod device;

pub use bus::{DeviceTranscript, LinkStats, SimulatedBus, SimulatedLink};
pub use device::{Behavior, OpenFailure, SimulatedDevice};
