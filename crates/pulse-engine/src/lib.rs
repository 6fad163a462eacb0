//! Pulse Engine
//!
//! Drives digital output lines from a [`pulse_ring::SharedRing`] on every
//! expiry of a hardware countdown timer, and gives the application a
//! producer handle to keep the ring filled and to start, stop and reset the
//! engine.
//!
//! ```no_run
//! use pulse_engine::{ConsumerThread, DeviceConfig, Parked, PulseDevice, SimulatedHardware};
//! use pulse_ring::Cell;
//!
//! let hardware = SimulatedHardware::new(1_000_000);
//! let device = PulseDevice::attach(DeviceConfig::default(), hardware)?;
//! let (mut producer, engine) = device.split();
//! let consumer = ConsumerThread::spawn(engine, Parked::default())?;
//!
//! producer.prime(&mut (0..).map(|i| Cell::set(500, 1 << (i % 4))))?;
//! producer.start()?;
//! # consumer.shutdown();
//! # Ok::<(), pulse_engine::DeviceError>(())
//! ```

mod config;
mod control;
mod device;
mod engine;
mod error;
mod hardware;
mod mapping;
mod producer;
mod trigger;

pub use config::{DeviceConfig, RecoveryPolicy, UnderrunPolicy};
pub use control::ControlSurface;
pub use device::PulseDevice;
pub use engine::{ConsumerEngine, Expiry};
pub use error::DeviceError;
pub use hardware::{PulseHardware, RecordingHardware, RegisterWrite, SimulatedHardware, PARKED};
pub use mapping::BufferMapping;
pub use producer::{FeedReport, Producer};
pub use trigger::{ConsumerStats, ConsumerThread, Parked, Polled, Trigger};
