//! Control surface: start, stop, reset, status and buffer mapping

use crate::device::DeviceCore;
use crate::{BufferMapping, DeviceConfig, DeviceError, PulseHardware, RecoveryPolicy, PARKED};
use pulse_ring::{layout, RingError, RingSnapshot, Status};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validated control operations on an attached device
pub struct ControlSurface<H: PulseHardware> {
    core: Arc<DeviceCore<H>>,
}

impl<H: PulseHardware> Clone for ControlSurface<H> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<H: PulseHardware> ControlSurface<H> {
    pub(crate) fn new(core: Arc<DeviceCore<H>>) -> Self {
        Self { core }
    }

    /// STOPPED → RUNNING, then arm the countdown with `initial_ticks`
    pub fn start(&self) -> Result<(), DeviceError> {
        let _guard = self.core.lock_control();
        let from = self.core.ring.status();
        let allowed = match from {
            Status::Stopped => true,
            Status::Underrun => self.core.config.recovery == RecoveryPolicy::ResetOrStart,
            Status::Running => false,
        };
        if !allowed {
            return Err(DeviceError::InvalidState {
                op: "start",
                status: from,
            });
        }

        self.core
            .ring
            .transition(from, Status::Running)
            .map_err(|status| DeviceError::InvalidState { op: "start", status })?;

        // A stale handler may still be parking the timer; arm after it is gone
        self.core.quiesce();
        self.core.hardware.load_countdown(self.core.config.initial_ticks);

        info!(
            "Pulse engine started from {} with {} cells pending",
            from,
            self.core.ring.len()
        );
        Ok(())
    }

    /// RUNNING → STOPPED and disarm. Returns once no handler is in flight;
    /// pending cells and the read position are kept for the next start.
    pub fn stop(&self) -> Result<(), DeviceError> {
        let _guard = self.core.lock_control();
        self.core
            .ring
            .transition(Status::Running, Status::Stopped)
            .map_err(|status| DeviceError::InvalidState { op: "stop", status })?;

        self.core.quiesce();
        self.core.hardware.load_countdown(PARKED);

        info!(
            "Pulse engine stopped with {} cells pending",
            self.core.ring.len()
        );
        Ok(())
    }

    /// Zero both indices and return to STOPPED; rejected while running
    pub fn reset(&self) -> Result<(), DeviceError> {
        let _guard = self.core.lock_control();
        let before = self.core.ring.status();
        self.core.ring.reset()?;
        self.core.hardware.load_countdown(PARKED);

        if before == Status::Underrun {
            info!("Pulse engine reset after underrun");
        } else {
            debug!("Pulse ring reset");
        }
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.core.ring.status()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.core.ring.snapshot()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.core.config
    }

    /// Expose `len` bytes of the shared region starting at `offset`.
    ///
    /// Like the character device this models, a successful mapping resets
    /// the indices and status.
    pub fn map_buffer(&self, offset: usize, len: usize) -> Result<BufferMapping<H>, DeviceError> {
        let available = self.core.ring.region_bytes();
        let requested = offset.checked_add(len).unwrap_or(usize::MAX);
        if requested > available {
            return Err(DeviceError::Size {
                requested,
                available,
            });
        }
        if len == 0 {
            return Err(DeviceError::Mapping("empty mapping".to_string()));
        }
        if offset % layout::WORD_BYTES != 0 || len % layout::WORD_BYTES != 0 {
            return Err(DeviceError::Mapping(format!(
                "window {}+{} is not aligned to {} byte words",
                offset,
                len,
                layout::WORD_BYTES
            )));
        }

        let _guard = self.core.lock_control();
        self.core.ring.reset().map_err(|err| match err {
            RingError::InvalidState { status, .. } => {
                warn!("Refusing to map pulse buffer while {}", status);
                DeviceError::InvalidState { op: "map", status }
            }
            other => other.into(),
        })?;
        info!("Mapped {} bytes of pulse buffer at offset {}", len, offset);

        Ok(BufferMapping::new(
            Arc::clone(&self.core),
            offset / layout::WORD_BYTES,
            len / layout::WORD_BYTES,
        ))
    }

    pub(crate) fn core(&self) -> &DeviceCore<H> {
        &self.core
    }
}
