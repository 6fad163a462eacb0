//! Direct word-level window onto the shared region
//!
//! This is the producer's view of the region as another address space would
//! see it through a shared mapping: plain words at fixed offsets, with no
//! help from the ring's position bookkeeping. Writers going through a
//! mapping write the cell words at `write_index`, then publish
//! `write_index + 1` wrapped at `capacity`.

use crate::device::DeviceCore;
use crate::{DeviceError, PulseHardware};
use pulse_ring::{layout, Cell, Status, Word};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A mapped window of the shared region
pub struct BufferMapping<H: PulseHardware> {
    core: Arc<DeviceCore<H>>,
    first_word: usize,
    len_words: usize,
}

impl<H: PulseHardware> BufferMapping<H> {
    pub(crate) fn new(core: Arc<DeviceCore<H>>, first_word: usize, len_words: usize) -> Self {
        Self {
            core,
            first_word,
            len_words,
        }
    }

    fn window(&self) -> &[AtomicUsize] {
        &self.core.ring.region()[self.first_word..self.first_word + self.len_words]
    }

    /// Byte offset of the window in the region
    pub fn offset(&self) -> usize {
        self.first_word * layout::WORD_BYTES
    }

    /// Window length in bytes
    pub fn len(&self) -> usize {
        self.len_words * layout::WORD_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.len_words == 0
    }

    /// Read the word at `index` within the window
    pub fn read_word(&self, index: usize) -> Option<Word> {
        self.window()
            .get(index)
            .map(|word| word.load(Ordering::Acquire))
    }

    /// Write the word at `index` within the window
    pub fn write_word(&self, index: usize, value: Word) -> Result<(), DeviceError> {
        let word = self.window().get(index).ok_or(DeviceError::Size {
            requested: (index + 1) * layout::WORD_BYTES,
            available: self.len(),
        })?;
        word.store(value, Ordering::Release);
        Ok(())
    }

    /// Region word index of cell `slot`, if the whole cell lies in the window
    fn cell_base(&self, slot: usize) -> Option<usize> {
        if slot >= self.core.ring.capacity() {
            return None;
        }
        let base = layout::cell_word(slot);
        let end = base + layout::CELL_WORDS;
        (base >= self.first_word && end <= self.first_word + self.len_words)
            .then(|| base - self.first_word)
    }

    /// Read cell `slot` through the window
    pub fn read_cell(&self, slot: usize) -> Option<Cell> {
        let base = self.cell_base(slot)?;
        let words = self.window();
        Some(Cell {
            delay: words[base].load(Ordering::Acquire),
            clear_mask: words[base + 1].load(Ordering::Acquire),
            set_mask: words[base + 2].load(Ordering::Acquire),
        })
    }

    /// Write cell `slot` through the window
    pub fn write_cell(&self, slot: usize, cell: Cell) -> Result<(), DeviceError> {
        let base = self.cell_base(slot).ok_or_else(|| {
            DeviceError::Mapping(format!("cell {} is outside the mapped window", slot))
        })?;
        let words = self.window();
        words[base].store(cell.delay, Ordering::Relaxed);
        words[base + 1].store(cell.clear_mask, Ordering::Relaxed);
        words[base + 2].store(cell.set_mask, Ordering::Release);
        Ok(())
    }

    /// Status word, when the header is inside the window
    pub fn status(&self) -> Option<Status> {
        self.header_word(layout::STATUS).map(Status::from_word)
    }

    /// Capacity word, when the header is inside the window
    pub fn capacity(&self) -> Option<Word> {
        self.header_word(layout::CAPACITY)
    }

    fn header_word(&self, word: usize) -> Option<Word> {
        word.checked_sub(self.first_word)
            .and_then(|index| self.read_word(index))
    }
}
