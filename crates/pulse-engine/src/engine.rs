//! Consumer Engine
//!
//! Runs once per countdown expiry as three steps: acknowledge the expiry,
//! fetch the next cell (or latch an underrun), reprogram the countdown and
//! outputs. Nothing here allocates, blocks or logs; failures are recorded in
//! the ring's status word for the producer to find.

use crate::device::DeviceCore;
use crate::{PulseHardware, UnderrunPolicy, PARKED};
use pulse_ring::{Cell, Status, Word};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

/// What one expiry did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Cell applied to the countdown and outputs
    Applied(Cell),
    /// No cell was pending; status latched and timer parked
    Underrun,
    /// Engine not running; expiry acknowledged and timer parked
    Idle,
}

/// Read side of the ring, driven by the countdown timer
pub struct ConsumerEngine<H: PulseHardware> {
    core: Arc<DeviceCore<H>>,
}

impl<H: PulseHardware> ConsumerEngine<H> {
    pub(crate) fn new(core: Arc<DeviceCore<H>>) -> Self {
        Self { core }
    }

    /// Service one countdown expiry.
    ///
    /// Call exactly once per expiry, from the interrupt handler or a
    /// [`crate::Trigger`] loop.
    pub fn on_timer_expiry(&self) -> Expiry {
        let core = &*self.core;
        core.in_handler.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        self.acknowledge();

        let outcome = if core.ring.status() != Status::Running {
            core.hardware.load_countdown(PARKED);
            Expiry::Idle
        } else {
            match self.fetch() {
                Some(cell) => {
                    self.reprogram(cell);
                    Expiry::Applied(cell)
                }
                None => {
                    self.park_after_underrun();
                    Expiry::Underrun
                }
            }
        };

        core.in_handler.store(false, Ordering::SeqCst);
        outcome
    }

    /// Step 1: clear the expiry condition
    #[inline]
    pub fn acknowledge(&self) {
        self.core.hardware.acknowledge_expiry();
    }

    /// Step 2: take the next cell; latches an underrun when none is pending
    #[inline]
    pub fn fetch(&self) -> Option<Cell> {
        self.core.ring.try_pop()
    }

    /// Step 3: reload the countdown, then clear, then set
    #[inline]
    pub fn reprogram(&self, cell: Cell) {
        let hardware = &self.core.hardware;
        hardware.load_countdown(self.countdown_for(cell.delay));
        hardware.clear_outputs(register_mask(cell.clear_mask));
        hardware.set_outputs(register_mask(cell.set_mask));
    }

    fn park_after_underrun(&self) {
        let hardware = &self.core.hardware;
        hardware.load_countdown(PARKED);
        if let UnderrunPolicy::ParkAndClear { mask } = self.core.config.underrun {
            hardware.clear_outputs(register_mask(mask));
        }
    }

    /// Scale a cell delay to register ticks, never producing the park value
    fn countdown_for(&self, delay: Word) -> u32 {
        let ticks = (delay as u64).saturating_mul(u64::from(self.core.config.ticks_per_unit));
        ticks.clamp(1, u64::from(u32::MAX)) as u32
    }

    pub fn hardware(&self) -> &H {
        &self.core.hardware
    }

    pub fn status(&self) -> Status {
        self.core.ring.status()
    }
}

/// Output registers are 32 bits wide; higher mask bits have no line
#[inline]
fn register_mask(mask: Word) -> u32 {
    (mask as u64 & u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceConfig, PulseDevice, RecordingHardware, RegisterWrite};

    fn engine_with(config: DeviceConfig) -> (crate::Producer<RecordingHardware>, ConsumerEngine<RecordingHardware>) {
        let device = PulseDevice::attach(config, RecordingHardware::new()).unwrap();
        let (producer, engine) = device.split();
        engine.hardware().take();
        (producer, engine)
    }

    #[test]
    fn test_expiry_acknowledges_then_reprograms() {
        let (mut producer, engine) = engine_with(DeviceConfig::default());
        producer.append(Cell::new(250, 0b0011, 0b0100)).unwrap();
        producer.start().unwrap();
        engine.hardware().take();

        assert_eq!(
            engine.on_timer_expiry(),
            Expiry::Applied(Cell::new(250, 0b0011, 0b0100))
        );
        assert_eq!(
            engine.hardware().take(),
            vec![
                RegisterWrite::Acknowledge,
                RegisterWrite::Countdown(250),
                RegisterWrite::Clear(0b0011),
                RegisterWrite::Set(0b0100),
            ]
        );
    }

    #[test]
    fn test_overlapping_masks_clear_before_set() {
        let (mut producer, engine) = engine_with(DeviceConfig::default());
        producer.append(Cell::new(10, 0b1, 0b1)).unwrap();
        producer.start().unwrap();
        engine.hardware().take();

        engine.on_timer_expiry();
        let writes = engine.hardware().take();
        let clear = writes.iter().position(|w| *w == RegisterWrite::Clear(1));
        let set = writes.iter().position(|w| *w == RegisterWrite::Set(1));
        assert!(clear < set);
    }

    #[test]
    fn test_underrun_parks_and_latches() {
        let (mut producer, engine) = engine_with(DeviceConfig::default());
        producer.append(Cell::wait(5)).unwrap();
        producer.start().unwrap();

        assert!(matches!(engine.on_timer_expiry(), Expiry::Applied(_)));
        engine.hardware().take();

        assert_eq!(engine.on_timer_expiry(), Expiry::Underrun);
        assert_eq!(engine.status(), Status::Underrun);
        assert_eq!(
            engine.hardware().take(),
            vec![RegisterWrite::Acknowledge, RegisterWrite::Countdown(PARKED)]
        );

        // Late data does not revive the engine
        producer.append(Cell::wait(5)).unwrap();
        assert_eq!(engine.on_timer_expiry(), Expiry::Idle);
        assert_eq!(engine.status(), Status::Underrun);
    }

    #[test]
    fn test_park_and_clear_policy() {
        let config = DeviceConfig {
            underrun: UnderrunPolicy::ParkAndClear { mask: 0b1111 },
            ..Default::default()
        };
        let (mut producer, engine) = engine_with(config);
        producer.start().unwrap();
        engine.hardware().take();

        assert_eq!(engine.on_timer_expiry(), Expiry::Underrun);
        assert_eq!(
            engine.hardware().take(),
            vec![
                RegisterWrite::Acknowledge,
                RegisterWrite::Countdown(PARKED),
                RegisterWrite::Clear(0b1111),
            ]
        );
    }

    #[test]
    fn test_idle_when_stopped() {
        let (mut producer, engine) = engine_with(DeviceConfig::default());
        producer.append(Cell::wait(5)).unwrap();

        assert_eq!(engine.on_timer_expiry(), Expiry::Idle);
        assert_eq!(
            engine.hardware().take(),
            vec![RegisterWrite::Acknowledge, RegisterWrite::Countdown(PARKED)]
        );
        assert_eq!(producer.pending(), 1);
    }

    #[test]
    fn test_delay_scaling_saturates() {
        let config = DeviceConfig {
            ticks_per_unit: 24,
            ..Default::default()
        };
        let (mut producer, engine) = engine_with(config);
        producer.append(Cell::wait(1000)).unwrap();
        producer.append(Cell::wait(Word::MAX)).unwrap();
        producer.append(Cell::wait(0)).unwrap();
        producer.start().unwrap();
        engine.hardware().take();

        let mut loads = Vec::new();
        for _ in 0..3 {
            engine.on_timer_expiry();
            loads.extend(engine.hardware().take().into_iter().filter_map(|w| match w {
                RegisterWrite::Countdown(ticks) => Some(ticks),
                _ => None,
            }));
        }
        assert_eq!(loads, vec![24_000, u32::MAX, 1]);
    }

    #[test]
    fn test_register_mask_truncates() {
        assert_eq!(register_mask(0b1010), 0b1010);
        assert_eq!(register_mask(Word::MAX), u32::MAX);
    }
}
