//! Expiry triggers
//!
//! On a platform with a dedicated fast interrupt, the handler calls
//! [`ConsumerEngine::on_timer_expiry`] directly. Without one, a
//! [`ConsumerThread`] services expiries from a dedicated thread and a
//! [`Trigger`] decides how that thread waits for the next one.

use crate::{ConsumerEngine, DeviceError, Expiry, PulseHardware};
use serde::Serialize;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

/// Decides when the next expiry is serviced
pub trait Trigger: Send + 'static {
    /// Block until an expiry is pending. Returns `false` once `shutdown` is set.
    fn wait_expiry<H: PulseHardware>(&mut self, hardware: &H, shutdown: &AtomicBool) -> bool;
}

/// Busy-wait on the expiry flag; lowest latency, burns a core
#[derive(Debug, Clone, Copy, Default)]
pub struct Polled;

impl Trigger for Polled {
    fn wait_expiry<H: PulseHardware>(&mut self, hardware: &H, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            if hardware.expiry_pending() {
                return true;
            }
            hint::spin_loop();
        }
    }
}

/// Sleep in short slices between checks of the expiry flag
#[derive(Debug, Clone, Copy)]
pub struct Parked {
    pub slice: Duration,
}

impl Default for Parked {
    fn default() -> Self {
        Self {
            slice: Duration::from_micros(50),
        }
    }
}

impl Trigger for Parked {
    fn wait_expiry<H: PulseHardware>(&mut self, hardware: &H, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            if hardware.expiry_pending() {
                return true;
            }
            thread::sleep(self.slice);
        }
    }
}

/// Counts kept by a consumer thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub applied: u64,
    pub underruns: u64,
    pub idle: u64,
}

impl ConsumerStats {
    fn record(&mut self, expiry: Expiry) {
        match expiry {
            Expiry::Applied(_) => self.applied += 1,
            Expiry::Underrun => self.underruns += 1,
            Expiry::Idle => self.idle += 1,
        }
    }
}

/// Consumer engine running on its own thread
pub struct ConsumerThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerThread {
    pub fn spawn<H, T>(engine: ConsumerEngine<H>, mut trigger: T) -> Result<Self, DeviceError>
    where
        H: PulseHardware + 'static,
        T: Trigger,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("pulse-consumer".to_string())
            .spawn(move || {
                let mut stats = ConsumerStats::default();
                while trigger.wait_expiry(engine.hardware(), &flag) {
                    stats.record(engine.on_timer_expiry());
                }
                stats
            })?;

        info!("Consumer thread started");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop servicing expiries and return the thread's counts
    pub fn shutdown(mut self) -> ConsumerStats {
        self.join()
    }

    fn join(&mut self) -> ConsumerStats {
        self.shutdown.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return ConsumerStats::default();
        };
        match handle.join() {
            Ok(stats) => {
                info!(
                    "Consumer thread stopped: {} applied, {} underruns, {} idle",
                    stats.applied, stats.underruns, stats.idle
                );
                stats
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        if self.handle.is_some() && !thread::panicking() {
            self.join();
        }
    }
}
