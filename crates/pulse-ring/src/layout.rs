//! Shared region layout
//!
//! ```text
//! word 0      read_index   next slot the consumer takes
//! word 1      write_index  next slot the producer fills
//! word 2      capacity
//! word 3      status
//! word 4..    cells[capacity], three words each: delay, clear_mask, set_mask
//! ```
//!
//! Both index words stay below `capacity`. A producer writing through a
//! mapping stores the cell words first, then `write_index + 1` wrapped at
//! `capacity`.

use crate::Word;
use std::mem::size_of;

pub const WORD_BYTES: usize = size_of::<Word>();

pub const READ_INDEX: usize = 0;
pub const WRITE_INDEX: usize = 1;
pub const CAPACITY: usize = 2;
pub const STATUS: usize = 3;

pub const HEADER_WORDS: usize = 4;
pub const CELL_WORDS: usize = 3;

pub const HEADER_BYTES: usize = HEADER_WORDS * WORD_BYTES;
pub const CELL_BYTES: usize = CELL_WORDS * WORD_BYTES;

/// Number of cells a region of `region_bytes` can hold after the header
pub const fn max_capacity(region_bytes: usize) -> usize {
    region_bytes.saturating_sub(HEADER_BYTES) / CELL_BYTES
}

/// Region size needed for exactly `capacity` cells
pub const fn region_bytes_for(capacity: usize) -> usize {
    HEADER_BYTES + capacity * CELL_BYTES
}

/// Word index of the first word of `slot`
pub const fn cell_word(slot: usize) -> usize {
    HEADER_WORDS + slot * CELL_WORDS
}
