//! Attached pulse device

use crate::{
    ConsumerEngine, ControlSurface, DeviceConfig, DeviceError, Producer, PulseHardware, PARKED,
};
use pulse_ring::SharedRing;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// State shared by the engine, the control surface and mappings
pub(crate) struct DeviceCore<H: PulseHardware> {
    pub(crate) ring: SharedRing,
    pub(crate) hardware: H,
    pub(crate) config: DeviceConfig,
    /// Raised for the duration of an expiry handler
    pub(crate) in_handler: AtomicBool,
    /// Serializes control operations from every handle (never taken by the engine)
    control_lock: Mutex<()>,
}

impl<H: PulseHardware> DeviceCore<H> {
    /// Spin until no expiry handler is running.
    ///
    /// Callers publish their status change with a SeqCst operation first; the
    /// handler raises `in_handler` before reading the status, so either the
    /// handler sees the new status or this call sees the handler.
    pub(crate) fn quiesce(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
        while self.in_handler.load(Ordering::SeqCst) {
            hint::spin_loop();
        }
    }

    /// Hold off other control operations until the guard drops
    pub(crate) fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.control_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H: PulseHardware> Drop for DeviceCore<H> {
    fn drop(&mut self) {
        self.hardware.load_countdown(PARKED);
        self.hardware.set_callback_enabled(false);
        debug!("Pulse device detached");
    }
}

/// One attached pulse device: a shared ring plus the hardware it drives
///
/// The device is split into exactly one [`Producer`] and one
/// [`ConsumerEngine`]; the ring is released when both are dropped.
pub struct PulseDevice<H: PulseHardware> {
    core: Arc<DeviceCore<H>>,
}

impl<H: PulseHardware> PulseDevice<H> {
    /// Allocate the ring, park the timer and enable the expiry callback
    pub fn attach(config: DeviceConfig, hardware: H) -> Result<Self, DeviceError> {
        config.validate()?;

        let mut ring = SharedRing::new(config.region_bytes)?;
        if let Some(capacity) = config.capacity {
            ring.init(capacity)?;
        }

        hardware.load_countdown(PARKED);
        hardware.set_callback_enabled(true);

        info!(
            "Pulse device attached: {} byte region, {} cells",
            ring.region_bytes(),
            ring.capacity()
        );

        Ok(Self {
            core: Arc::new(DeviceCore {
                ring,
                hardware,
                config,
                in_handler: AtomicBool::new(false),
                control_lock: Mutex::new(()),
            }),
        })
    }

    /// Control surface, for status polling from other tasks
    pub fn control(&self) -> ControlSurface<H> {
        ControlSurface::new(Arc::clone(&self.core))
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.core.config
    }

    pub fn hardware(&self) -> &H {
        &self.core.hardware
    }

    /// Hand out the single producer and the single consumer
    pub fn split(self) -> (Producer<H>, ConsumerEngine<H>) {
        let producer = Producer::new(ControlSurface::new(Arc::clone(&self.core)));
        let engine = ConsumerEngine::new(self.core);
        (producer, engine)
    }
}
