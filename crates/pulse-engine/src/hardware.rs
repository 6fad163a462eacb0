//! Register-level hardware interface
//!
//! The engine needs exactly four registers from the platform: a countdown
//! that fires once when it reaches zero, an expiry acknowledge, and
//! bit-set/bit-clear output registers. Methods take `&self` because the
//! registers are shared between the expiry handler and the control path,
//! exactly like memory-mapped I/O.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Countdown value that disarms the timer
pub const PARKED: u32 = 0;

/// Registers the consumer engine drives
pub trait PulseHardware: Send + Sync {
    /// Clear the pending expiry condition
    fn acknowledge_expiry(&self);

    /// Fire the next expiry `ticks` after the previous one; [`PARKED`] disarms
    fn load_countdown(&self, ticks: u32);

    /// Drive the masked output lines low
    fn clear_outputs(&self, mask: u32);

    /// Drive the masked output lines high
    fn set_outputs(&self, mask: u32);

    /// Whether an expiry is waiting to be serviced (used by polled triggers)
    fn expiry_pending(&self) -> bool;

    /// Route expiries to the handler, or stop routing them
    fn set_callback_enabled(&self, _enabled: bool) {}
}

impl<T: PulseHardware + ?Sized> PulseHardware for Arc<T> {
    fn acknowledge_expiry(&self) {
        (**self).acknowledge_expiry()
    }

    fn load_countdown(&self, ticks: u32) {
        (**self).load_countdown(ticks)
    }

    fn clear_outputs(&self, mask: u32) {
        (**self).clear_outputs(mask)
    }

    fn set_outputs(&self, mask: u32) {
        (**self).set_outputs(mask)
    }

    fn expiry_pending(&self) -> bool {
        (**self).expiry_pending()
    }

    fn set_callback_enabled(&self, enabled: bool) {
        (**self).set_callback_enabled(enabled)
    }
}

/// Host simulation of a countdown timer and an output port
///
/// Countdowns are phase-locked: a reload right after an acknowledge counts
/// from the expiry that was acknowledged, not from the time of the reload,
/// so handler latency does not accumulate.
pub struct SimulatedHardware {
    epoch: Instant,
    tick_ns: u64,
    /// Expiry time in ns since `epoch`, 0 when parked
    deadline_ns: AtomicU64,
    /// Last acknowledged expiry, consumed by the next reload
    anchor_ns: AtomicU64,
    outputs: AtomicU32,
    countdown: AtomicU32,
    expiries: AtomicU64,
    callback_enabled: AtomicBool,
}

impl SimulatedHardware {
    /// Create a timer ticking at `tick_rate_hz` (clamped to 1 GHz)
    pub fn new(tick_rate_hz: u64) -> Self {
        Self {
            epoch: Instant::now(),
            tick_ns: (1_000_000_000 / tick_rate_hz.max(1)).max(1),
            deadline_ns: AtomicU64::new(0),
            anchor_ns: AtomicU64::new(0),
            outputs: AtomicU32::new(0),
            countdown: AtomicU32::new(PARKED),
            expiries: AtomicU64::new(0),
            callback_enabled: AtomicBool::new(false),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Current level of every output line
    pub fn outputs(&self) -> u32 {
        self.outputs.load(Ordering::Acquire)
    }

    /// Last value loaded into the countdown register
    pub fn countdown(&self) -> u32 {
        self.countdown.load(Ordering::Acquire)
    }

    pub fn is_parked(&self) -> bool {
        self.deadline_ns.load(Ordering::Acquire) == 0
    }

    /// Number of acknowledged expiries
    pub fn expiries(&self) -> u64 {
        self.expiries.load(Ordering::Relaxed)
    }

    pub fn callback_enabled(&self) -> bool {
        self.callback_enabled.load(Ordering::Acquire)
    }

    /// Nanoseconds per tick
    pub fn tick_ns(&self) -> u64 {
        self.tick_ns
    }
}

impl PulseHardware for SimulatedHardware {
    fn acknowledge_expiry(&self) {
        let fired = self.deadline_ns.swap(0, Ordering::AcqRel);
        if fired != 0 {
            self.anchor_ns.store(fired, Ordering::Release);
            self.expiries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn load_countdown(&self, ticks: u32) {
        self.countdown.store(ticks, Ordering::Release);
        let anchor = self.anchor_ns.swap(0, Ordering::AcqRel);
        if ticks == PARKED {
            self.deadline_ns.store(0, Ordering::Release);
            return;
        }

        let base = if anchor != 0 { anchor } else { self.now_ns() };
        let deadline = base.saturating_add(u64::from(ticks) * self.tick_ns).max(1);
        self.deadline_ns.store(deadline, Ordering::Release);
    }

    fn clear_outputs(&self, mask: u32) {
        self.outputs.fetch_and(!mask, Ordering::AcqRel);
    }

    fn set_outputs(&self, mask: u32) {
        self.outputs.fetch_or(mask, Ordering::AcqRel);
    }

    fn expiry_pending(&self) -> bool {
        if !self.callback_enabled.load(Ordering::Acquire) {
            return false;
        }
        let deadline = self.deadline_ns.load(Ordering::Acquire);
        deadline != 0 && self.now_ns() >= deadline
    }

    fn set_callback_enabled(&self, enabled: bool) {
        self.callback_enabled.store(enabled, Ordering::Release);
    }
}

/// One register access, in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWrite {
    Acknowledge,
    Countdown(u32),
    Clear(u32),
    Set(u32),
    Callback(bool),
}

/// Hardware stand-in that records every register write
///
/// Expiries are raised by hand with [`RecordingHardware::raise_expiry`].
#[derive(Default)]
pub struct RecordingHardware {
    writes: Mutex<Vec<RegisterWrite>>,
    pending: AtomicBool,
}

impl RecordingHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an expiry as pending
    pub fn raise_expiry(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Copy of every write so far
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.log().clone()
    }

    /// Drain the write log
    pub fn take(&self) -> Vec<RegisterWrite> {
        std::mem::take(&mut *self.log())
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<RegisterWrite>> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, write: RegisterWrite) {
        self.log().push(write);
    }
}

impl PulseHardware for RecordingHardware {
    fn acknowledge_expiry(&self) {
        self.pending.store(false, Ordering::Release);
        self.record(RegisterWrite::Acknowledge);
    }

    fn load_countdown(&self, ticks: u32) {
        self.record(RegisterWrite::Countdown(ticks));
    }

    fn clear_outputs(&self, mask: u32) {
        self.record(RegisterWrite::Clear(mask));
    }

    fn set_outputs(&self, mask: u32) {
        self.record(RegisterWrite::Set(mask));
    }

    fn expiry_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn set_callback_enabled(&self, enabled: bool) {
        self.record(RegisterWrite::Callback(enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_outputs_clear_then_set() {
        let hw = SimulatedHardware::new(1_000_000);
        hw.set_outputs(0b1111);
        hw.clear_outputs(0b0110);
        assert_eq!(hw.outputs(), 0b1001);
        hw.clear_outputs(0b0001);
        hw.set_outputs(0b0001);
        assert_eq!(hw.outputs(), 0b1001);
    }

    #[test]
    fn test_countdown_fires_once() {
        let hw = SimulatedHardware::new(1_000_000);
        hw.set_callback_enabled(true);
        hw.load_countdown(100);
        assert!(!hw.is_parked());

        thread::sleep(Duration::from_millis(2));
        assert!(hw.expiry_pending());
        hw.acknowledge_expiry();
        assert!(!hw.expiry_pending());
        assert_eq!(hw.expiries(), 1);

        // Double acknowledge is a no-op on the simulated counter
        hw.acknowledge_expiry();
        assert_eq!(hw.expiries(), 1);
    }

    #[test]
    fn test_park_disarms() {
        let hw = SimulatedHardware::new(1_000_000);
        hw.set_callback_enabled(true);
        hw.load_countdown(1);
        hw.load_countdown(PARKED);
        thread::sleep(Duration::from_millis(1));
        assert!(hw.is_parked());
        assert!(!hw.expiry_pending());
    }

    #[test]
    fn test_disabled_callback_hides_expiry() {
        let hw = SimulatedHardware::new(1_000_000);
        hw.load_countdown(1);
        thread::sleep(Duration::from_millis(1));
        assert!(!hw.expiry_pending());
    }

    #[test]
    fn test_recording_order() {
        let hw = RecordingHardware::new();
        hw.raise_expiry();
        assert!(hw.expiry_pending());
        hw.acknowledge_expiry();
        hw.load_countdown(5);
        hw.clear_outputs(1);
        hw.set_outputs(2);

        assert!(!hw.expiry_pending());
        assert_eq!(
            hw.take(),
            vec![
                RegisterWrite::Acknowledge,
                RegisterWrite::Countdown(5),
                RegisterWrite::Clear(1),
                RegisterWrite::Set(2),
            ]
        );
        assert!(hw.writes().is_empty());
    }
}
