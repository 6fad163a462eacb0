//! Device configuration

use crate::DeviceError;
use pulse_ring::{Word, DEFAULT_REGION_BYTES};
use serde::{Deserialize, Serialize};

/// What the engine does when a cell is due and none is pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UnderrunPolicy {
    /// Park the countdown, leave outputs latched
    #[default]
    Park,
    /// Park the countdown and drive `mask` low
    ParkAndClear { mask: Word },
}

/// Which control operations clear a latched underrun
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Only `reset` leaves the underrun state
    #[default]
    ResetOnly,
    /// `start` may also resume from an underrun, keeping pending cells
    ResetOrStart,
}

/// Pulse device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Size of the shared region in bytes (default: 2048)
    pub region_bytes: usize,
    /// Ring capacity in cells; `None` fills the region
    pub capacity: Option<usize>,
    /// Countdown loaded by `start` before the first cell (default: 1000)
    pub initial_ticks: u32,
    /// Timer ticks per unit of `Cell::delay` (default: 1)
    pub ticks_per_unit: u32,
    /// Underrun handling
    pub underrun: UnderrunPolicy,
    /// Underrun recovery
    pub recovery: RecoveryPolicy,
    /// Fraction of capacity `Producer::prime` fills before start (default: 0.5)
    pub prime_fraction: f64,
    /// Reject cells whose clear and set masks overlap
    pub reject_overlap: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            region_bytes: DEFAULT_REGION_BYTES,
            capacity: None,
            initial_ticks: 1000,
            ticks_per_unit: 1,
            underrun: UnderrunPolicy::Park,
            recovery: RecoveryPolicy::ResetOnly,
            prime_fraction: 0.5,
            reject_overlap: false,
        }
    }
}

impl DeviceConfig {
    /// Load from an optional file, then `PULSE_*` environment overrides
    pub fn load(path: Option<&str>) -> Result<Self, DeviceError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config: DeviceConfig = builder
            .add_source(
                config::Environment::with_prefix("PULSE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.initial_ticks == 0 {
            return Err(DeviceError::InvalidConfig(
                "initial_ticks must be non-zero, zero parks the timer".to_string(),
            ));
        }
        if self.ticks_per_unit == 0 {
            return Err(DeviceError::InvalidConfig(
                "ticks_per_unit must be non-zero".to_string(),
            ));
        }
        if !(self.prime_fraction > 0.0 && self.prime_fraction <= 1.0) {
            return Err(DeviceError::InvalidConfig(format!(
                "prime_fraction {} outside (0, 1]",
                self.prime_fraction
            )));
        }
        Ok(())
    }
}
