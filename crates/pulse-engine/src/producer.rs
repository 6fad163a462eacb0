//! Producer API

use crate::{BufferMapping, ControlSurface, DeviceError, PulseHardware};
use pulse_ring::{Cell, Push, RingSnapshot, Status};
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest poll period `feed` and `drain` accept
const MIN_PACE: Duration = Duration::from_micros(100);

/// Outcome of [`Producer::feed`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    /// Cells appended
    pub pushed: usize,
    /// Appends that replaced a cell the engine had not consumed
    pub overwritten: usize,
    /// Status polls performed
    pub polls: usize,
    /// Engine status that ended the feed before the cells ran out
    pub interrupted: Option<Status>,
}

/// Write side of the ring plus the control operations
///
/// There is exactly one producer per device; it is the only writer of the
/// write cursor and never touches the read cursor.
pub struct Producer<H: PulseHardware> {
    control: ControlSurface<H>,
    overwritten: usize,
}

impl<H: PulseHardware> Producer<H> {
    pub(crate) fn new(control: ControlSurface<H>) -> Self {
        Self {
            control,
            overwritten: 0,
        }
    }

    /// Append one cell. The caller paces appends against the tick rate.
    pub fn append(&mut self, cell: Cell) -> Result<(), DeviceError> {
        let core = self.control.core();
        if core.config.reject_overlap && cell.has_overlap() {
            return Err(DeviceError::InvalidCell(cell));
        }

        if core.ring.try_push(cell) == Push::Overwrote {
            self.overwritten += 1;
            debug!("Producer lapped the engine ({} cells overwritten)", self.overwritten);
        }
        Ok(())
    }

    /// Append every cell, stopping at the first rejected one
    pub fn append_all<I>(&mut self, cells: I) -> Result<usize, DeviceError>
    where
        I: IntoIterator<Item = Cell>,
    {
        let mut count = 0;
        for cell in cells {
            self.append(cell)?;
            count += 1;
        }
        Ok(count)
    }

    /// Burst-fill up to the configured prime level before `start`.
    ///
    /// Returns how many cells were taken from `cells`.
    pub fn prime<I>(&mut self, cells: &mut I) -> Result<usize, DeviceError>
    where
        I: Iterator<Item = Cell>,
    {
        let target = self.prime_level();
        let mut count = 0;
        while self.pending() < target {
            let Some(cell) = cells.next() else { break };
            self.append(cell)?;
            count += 1;
        }
        debug!("Primed {} cells (target {})", count, target);
        Ok(count)
    }

    /// Number of cells `prime` aims for
    pub fn prime_level(&self) -> usize {
        let capacity = self.capacity();
        ((capacity as f64 * self.control.config().prime_fraction).ceil() as usize).clamp(1, capacity)
    }

    /// Keep the ring topped up to `high_water` cells until `cells` runs out,
    /// polling the engine status every `pace`.
    ///
    /// Returns early if the engine leaves RUNNING, with the status that
    /// stopped it in [`FeedReport::interrupted`] and the cells pushed so far.
    /// Fails only if a cell is rejected.
    pub async fn feed<I>(
        &mut self,
        cells: I,
        high_water: usize,
        pace: Duration,
    ) -> Result<FeedReport, DeviceError>
    where
        I: IntoIterator<Item = Cell>,
    {
        let high_water = high_water.clamp(1, self.capacity());
        let overwritten_before = self.overwritten;
        let mut cells = cells.into_iter().peekable();
        let mut report = FeedReport::default();

        info!("Feeding pulse ring to {} cells every {:?}", high_water, pace);

        let mut ticker = tokio::time::interval(pace.max(MIN_PACE));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while cells.peek().is_some() {
            ticker.tick().await;

            while self.pending() < high_water {
                let Some(cell) = cells.next() else { break };
                self.append(cell)?;
                report.pushed += 1;
            }

            report.polls += 1;
            match self.status() {
                Status::Running => {}
                status => {
                    warn!(
                        "Feed interrupted after {} cells: engine is {}",
                        report.pushed, status
                    );
                    report.interrupted = Some(status);
                    break;
                }
            }
        }

        report.overwritten = self.overwritten - overwritten_before;
        if report.interrupted.is_none() {
            info!(
                "Feed complete: {} cells pushed, {} overwritten",
                report.pushed, report.overwritten
            );
        }
        Ok(report)
    }

    /// Wait until the engine has consumed everything, or stops running.
    ///
    /// The engine latches an underrun once the ring runs dry, so a fully
    /// drained run ends in [`Status::Underrun`] with nothing pending.
    pub async fn drain(&self, pace: Duration) -> RingSnapshot {
        let mut ticker = tokio::time::interval(pace.max(MIN_PACE));
        loop {
            ticker.tick().await;
            let snapshot = self.snapshot();
            if snapshot.status != Status::Running {
                debug!("Drain finished with engine {}", snapshot.status);
                return snapshot;
            }
        }
    }

    pub fn start(&self) -> Result<(), DeviceError> {
        self.control.start()
    }

    pub fn stop(&self) -> Result<(), DeviceError> {
        self.control.stop()
    }

    pub fn reset(&mut self) -> Result<(), DeviceError> {
        self.control.reset()?;
        self.overwritten = 0;
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.control.status()
    }

    /// Status, with a latched underrun turned into an error
    pub fn check(&self) -> Result<Status, DeviceError> {
        match self.status() {
            Status::Underrun => {
                let pending = self.pending();
                warn!("Pulse engine underrun detected ({} cells pending)", pending);
                Err(DeviceError::Underrun { pending })
            }
            status => Ok(status),
        }
    }

    pub fn map_buffer(&self, offset: usize, len: usize) -> Result<BufferMapping<H>, DeviceError> {
        self.control.map_buffer(offset, len)
    }

    /// Cells waiting to be consumed
    pub fn pending(&self) -> usize {
        self.control.core().ring.len()
    }

    pub fn free_slots(&self) -> usize {
        self.capacity() - self.pending()
    }

    pub fn capacity(&self) -> usize {
        self.control.core().ring.capacity()
    }

    /// Appends that overwrote an unconsumed cell since the last reset
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.control.snapshot()
    }

    pub fn control(&self) -> &ControlSurface<H> {
        &self.control
    }
}
