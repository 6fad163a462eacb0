//! Lock-Free Pulse Ring
//!
//! Provides the fixed-capacity SPSC ring of timed output cells that a pulse
//! engine consumes on every countdown expiry while an application keeps it
//! filled. The whole ring is one flat region of machine words so it can be
//! shared with another address space word for word (see [`layout`]).

mod buffer;
mod error;
pub mod layout;

pub use buffer::{Push, RingSnapshot, SharedRing, DEFAULT_REGION_BYTES};
pub use error::RingError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native machine word used for every field of the shared region
pub type Word = usize;

/// One scheduled unit of work: wait `delay` ticks, then drive outputs
///
/// The field order is part of the shared layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    /// Countdown ticks to load when this cell is applied
    pub delay: Word,
    /// Output bits driven low
    #[serde(default)]
    pub clear_mask: Word,
    /// Output bits driven high (applied after `clear_mask`)
    #[serde(default)]
    pub set_mask: Word,
}

impl Cell {
    pub const fn new(delay: Word, clear_mask: Word, set_mask: Word) -> Self {
        Self {
            delay,
            clear_mask,
            set_mask,
        }
    }

    /// Raise `mask` and wait `delay` ticks
    pub const fn set(delay: Word, mask: Word) -> Self {
        Self::new(delay, 0, mask)
    }

    /// Lower `mask` and wait `delay` ticks
    pub const fn clear(delay: Word, mask: Word) -> Self {
        Self::new(delay, mask, 0)
    }

    /// Leave outputs alone and wait `delay` ticks
    pub const fn wait(delay: Word) -> Self {
        Self::new(delay, 0, 0)
    }

    /// True when a bit is both cleared and set (set wins)
    pub const fn has_overlap(&self) -> bool {
        self.clear_mask & self.set_mask != 0
    }
}

/// Engine state as stored in the status word
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Stopped = 0,
    Running = 1,
    /// Latched by the consumer when a cell was due and none was pending
    Underrun = 2,
}

impl Status {
    /// Decode a status word. Unknown values read as `Stopped`, which keeps the
    /// engine idle if a mapping writer scribbles over the header.
    pub fn from_word(word: Word) -> Self {
        match word {
            1 => Status::Running,
            2 => Status::Underrun,
            _ => Status::Stopped,
        }
    }

    pub const fn as_word(self) -> Word {
        self as Word
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Stopped => "STOPPED",
            Status::Running => "RUNNING",
            Status::Underrun => "ERROR_UNDERRUN",
        };
        f.write_str(name)
    }
}
