//! Lock-Free Shared Ring Implementation

use crate::layout::{self, cell_word, CAPACITY, READ_INDEX, STATUS, WRITE_INDEX};
use crate::{Cell, RingError, Status, Word};
use serde::{Deserialize, Serialize};
use std::hint;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

/// Default backing region size (2 KiB)
pub const DEFAULT_REGION_BYTES: usize = 2048;

/// How many times a pop may resynchronize behind a lapping producer
const MAX_RESYNC_ATTEMPTS: usize = 4;

/// Status word held while `reset` rewrites the indices
const RESETTING: Word = Word::MAX;

/// Result of a producer push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Cell stored in a free slot
    Stored,
    /// Cell replaced one the consumer had not taken yet
    Overwrote,
}

/// Point-in-time view of the ring for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSnapshot {
    pub capacity: usize,
    pub read_index: usize,
    pub write_index: usize,
    pub pending: usize,
    pub dropped: usize,
    pub status: Status,
}

/// Arithmetic over free-running positions.
///
/// Positions wrap at `modulus`, a multiple of `capacity`, so
/// `position % capacity` stays continuous across the wrap.
#[derive(Debug, Clone, Copy)]
struct CursorSpace {
    capacity: usize,
    modulus: usize,
}

impl CursorSpace {
    fn new(capacity: usize) -> Self {
        Self::with_modulus(capacity, (usize::MAX / capacity) * capacity)
    }

    fn with_modulus(capacity: usize, modulus: usize) -> Self {
        debug_assert!(capacity > 0 && modulus % capacity == 0 && modulus >= 2 * capacity);
        Self { capacity, modulus }
    }

    #[inline]
    fn slot(&self, cursor: usize) -> usize {
        cursor % self.capacity
    }

    #[inline]
    fn advance(&self, cursor: usize, n: usize) -> usize {
        let room = self.modulus - cursor;
        if n < room {
            cursor + n
        } else {
            n - room
        }
    }

    #[inline]
    fn retreat(&self, cursor: usize, n: usize) -> usize {
        if cursor >= n {
            cursor - n
        } else {
            self.modulus - (n - cursor)
        }
    }

    /// How far `ahead` is in front of `behind`
    #[inline]
    fn distance(&self, ahead: usize, behind: usize) -> usize {
        if ahead >= behind {
            ahead - behind
        } else {
            self.modulus - behind + ahead
        }
    }
}

/// Lock-free SPSC ring of cells over a flat region of words
///
/// `try_push` must only be called from one producer and `try_pop` from one
/// consumer. Both are wait-free and never allocate.
///
/// The header holds slot indices, as any process sharing the region sees
/// them. The full positions behind them run free in private words so a ring
/// holding `capacity` cells is told apart from an empty one.
pub struct SharedRing {
    /// Header words followed by cell words, see [`crate::layout`]
    words: Box<[AtomicUsize]>,
    /// Position arithmetic for the configured capacity
    space: CursorSpace,
    /// Position just past the last published cell
    written: AtomicUsize,
    /// Position of the next cell to consume (consumer owned)
    taken: AtomicUsize,
    /// Position just past the slot the producer is writing (producer owned)
    claim: AtomicUsize,
    /// Cells lost to a lapping producer (consumer owned)
    dropped: AtomicUsize,
}

impl SharedRing {
    /// Allocate a region of `region_bytes` and size the ring to fill it
    pub fn new(region_bytes: usize) -> Result<Self, RingError> {
        let words = (0..region_bytes / layout::WORD_BYTES)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let mut ring = Self {
            words,
            space: CursorSpace::new(1),
            written: AtomicUsize::new(0),
            taken: AtomicUsize::new(0),
            claim: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        };
        ring.init(layout::max_capacity(region_bytes))?;
        Ok(ring)
    }

    /// Allocate a region sized for exactly `capacity` cells
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        let mut ring = Self::new(layout::region_bytes_for(capacity.max(1)))?;
        ring.init(capacity)?;
        Ok(ring)
    }

    /// Create a ring with the default 2 KiB region
    pub fn with_default_region() -> Result<Self, RingError> {
        Self::new(DEFAULT_REGION_BYTES)
    }

    /// Zero the region and fix the capacity
    pub fn init(&mut self, capacity: usize) -> Result<(), RingError> {
        let max = layout::max_capacity(self.region_bytes());
        if capacity == 0 || capacity > max {
            return Err(RingError::Capacity {
                requested: capacity,
                max,
            });
        }

        for word in self.words.iter_mut() {
            *word.get_mut() = 0;
        }
        *self.words[CAPACITY].get_mut() = capacity;
        *self.words[STATUS].get_mut() = Status::Stopped.as_word();
        *self.written.get_mut() = 0;
        *self.taken.get_mut() = 0;
        *self.claim.get_mut() = 0;
        *self.dropped.get_mut() = 0;
        self.space = CursorSpace::new(capacity);
        Ok(())
    }

    #[cfg(test)]
    fn with_cursor_modulus(capacity: usize, modulus: usize) -> Self {
        let mut ring = Self::with_capacity(capacity).unwrap();
        ring.space = CursorSpace::with_modulus(capacity, modulus);
        ring
    }

    /// Zero both indices and return to `Stopped`; rejected while running.
    ///
    /// The status word holds a private value while the indices are rewritten,
    /// so a concurrent `transition` to `Running` fails instead of racing it.
    pub fn reset(&self) -> Result<(), RingError> {
        let mut current = self.words[STATUS].load(Ordering::SeqCst);
        loop {
            if current == RESETTING {
                hint::spin_loop();
                current = self.words[STATUS].load(Ordering::SeqCst);
                continue;
            }
            let status = Status::from_word(current);
            if status == Status::Running {
                return Err(RingError::InvalidState { op: "reset", status });
            }
            match self.words[STATUS].compare_exchange_weak(
                current,
                RESETTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.claim.store(0, Ordering::Relaxed);
        self.written.store(0, Ordering::Relaxed);
        self.taken.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.words[READ_INDEX].store(0, Ordering::Relaxed);
        self.words[WRITE_INDEX].store(0, Ordering::Relaxed);
        self.words[STATUS].store(Status::Stopped.as_word(), Ordering::SeqCst);
        Ok(())
    }

    /// Append a cell (producer only). Never blocks; overwrites the oldest
    /// pending cell once the producer is `capacity` cells ahead.
    pub fn try_push(&self, cell: Cell) -> Push {
        let write = self.write_position();
        let next = self.space.advance(write, 1);

        // Announce the slot before touching it so a reader can spot a torn copy
        self.claim.store(next, Ordering::Relaxed);
        fence(Ordering::Release);

        let base = cell_word(self.space.slot(write));
        self.words[base].store(cell.delay, Ordering::Relaxed);
        self.words[base + 1].store(cell.clear_mask, Ordering::Relaxed);
        self.words[base + 2].store(cell.set_mask, Ordering::Relaxed);

        // Index before position: a reader that sees the index ahead of the
        // position advances the position to match, never past it
        self.words[WRITE_INDEX].store(self.space.slot(next), Ordering::Release);
        self.written.store(next, Ordering::Release);

        let read = self.taken.load(Ordering::Acquire);
        if self.space.distance(next, read) > self.space.capacity {
            Push::Overwrote
        } else {
            Push::Stored
        }
    }

    /// Take the next cell (consumer only).
    ///
    /// Returns `None` and latches [`Status::Underrun`] when nothing is pending.
    /// Once latched, keeps returning `None` until the status is cleared.
    pub fn try_pop(&self) -> Option<Cell> {
        let observed = self.status();
        if observed == Status::Underrun {
            return None;
        }

        let capacity = self.space.capacity;
        let mut read = self.taken.load(Ordering::Relaxed);

        for _ in 0..MAX_RESYNC_ATTEMPTS {
            let write = self.write_position();
            let pending = self.space.distance(write, read);
            if pending == 0 {
                self.publish_read(read);
                self.flag_underrun(observed);
                return None;
            }
            if pending > capacity {
                read = self.resync(read, self.space.retreat(write, capacity));
            }

            let cell = self.load_cell(self.space.slot(read));

            fence(Ordering::Acquire);
            let frontier = self.frontier();
            if self.space.distance(frontier, read) <= capacity {
                self.publish_read(self.space.advance(read, 1));
                return Some(cell);
            }

            // The producer reached this slot while it was being copied
            read = self.resync(read, self.space.retreat(frontier, capacity));
        }

        self.publish_read(read);
        self.flag_underrun(observed);
        None
    }

    /// Position just past the last published cell.
    ///
    /// A writer going through a raw mapping only moves the header's
    /// `write_index`; the slots it moved by are folded into the position
    /// here. Such a writer must stay less than `capacity` cells ahead of
    /// the last reconciliation, since a full lap leaves the index unchanged.
    fn write_position(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let capacity = self.space.capacity;
        let index = self.words[WRITE_INDEX].load(Ordering::Acquire) % capacity;
        let ahead = (index + capacity - self.space.slot(written)) % capacity;
        if ahead == 0 {
            return written;
        }

        let target = self.space.advance(written, ahead);
        match self
            .written
            .compare_exchange(written, target, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => target,
            // The producer published in between; its position already covers the index
            Err(current) => current,
        }
    }

    /// Furthest position the producer may be writing.
    ///
    /// A mapping writer never updates the claim, leaving it behind the write
    /// position; fall back to the position then.
    #[inline]
    fn frontier(&self) -> usize {
        // Position first: the claim never trails a position it was loaded after
        let write = self.write_position();
        let claim = self.claim.load(Ordering::Relaxed);
        if self.space.distance(claim, write) < self.space.modulus / 2 {
            claim
        } else {
            write
        }
    }

    #[inline]
    fn publish_read(&self, read: usize) {
        self.taken.store(read, Ordering::Release);
        self.words[READ_INDEX].store(self.space.slot(read), Ordering::Release);
    }

    fn resync(&self, from: usize, to: usize) -> usize {
        self.dropped
            .fetch_add(self.space.distance(to, from), Ordering::Relaxed);
        to
    }

    fn flag_underrun(&self, observed: Status) {
        // Leave a concurrent stop or reset alone
        let _ = self.words[STATUS].compare_exchange(
            observed.as_word(),
            Status::Underrun.as_word(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    #[inline]
    fn load_cell(&self, slot: usize) -> Cell {
        let base = cell_word(slot);
        Cell {
            delay: self.words[base].load(Ordering::Relaxed),
            clear_mask: self.words[base + 1].load(Ordering::Relaxed),
            set_mask: self.words[base + 2].load(Ordering::Relaxed),
        }
    }

    /// Current engine status
    pub fn status(&self) -> Status {
        Status::from_word(self.words[STATUS].load(Ordering::Acquire))
    }

    /// Overwrite the status word
    pub fn set_status(&self, status: Status) {
        self.words[STATUS].store(status.as_word(), Ordering::Release);
    }

    /// Move from `from` to `to` only if the status is still `from`
    pub fn transition(&self, from: Status, to: Status) -> Result<(), Status> {
        self.words[STATUS]
            .compare_exchange(
                from.as_word(),
                to.as_word(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(Status::from_word)
    }

    /// Get the number of cells waiting to be consumed
    pub fn len(&self) -> usize {
        let write = self.write_position();
        let read = self.taken.load(Ordering::Acquire);
        self.space.distance(write, read).min(self.space.capacity)
    }

    /// Check if no cell is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the ring capacity in cells
    pub fn capacity(&self) -> usize {
        self.space.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.space.capacity as f64
    }

    /// Slot the consumer will read next
    pub fn read_index(&self) -> usize {
        self.space.slot(self.taken.load(Ordering::Acquire))
    }

    /// Slot the producer will write next
    pub fn write_index(&self) -> usize {
        self.space.slot(self.write_position())
    }

    /// Cells skipped because the producer lapped the consumer
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Size of the backing region in bytes
    pub fn region_bytes(&self) -> usize {
        self.words.len() * layout::WORD_BYTES
    }

    /// Raw word view of the whole region, for mappings
    pub fn region(&self) -> &[AtomicUsize] {
        &self.words
    }

    /// Capacity as recorded in the region header
    pub fn header_capacity(&self) -> Word {
        self.words[CAPACITY].load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            capacity: self.capacity(),
            read_index: self.read_index(),
            write_index: self.write_index(),
            pending: self.len(),
            dropped: self.dropped(),
            status: self.status(),
        }
    }
}
