//! Property and cross-thread tests for the shared ring

use proptest::prelude::*;
use pulse_ring::{Cell, SharedRing, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn cell_strategy() -> impl Strategy<Value = Cell> {
    (1usize..100_000, any::<u8>(), any::<u8>())
        .prop_map(|(delay, clear, set)| Cell::new(delay, clear as usize, set as usize))
}

proptest! {
    #[test]
    fn fifo_without_overwrite(capacity in 1usize..64, cells in prop::collection::vec(cell_strategy(), 0..64)) {
        let ring = SharedRing::with_capacity(capacity).unwrap();
        let cells: Vec<_> = cells.into_iter().take(capacity).collect();
        for cell in &cells {
            ring.try_push(*cell);
        }
        prop_assert_eq!(ring.write_index(), cells.len() % capacity);
        prop_assert_eq!(ring.len(), cells.len());

        let popped: Vec<_> = (0..cells.len()).filter_map(|_| ring.try_pop()).collect();
        prop_assert_eq!(popped, cells);
        prop_assert_eq!(ring.dropped(), 0);
    }

    #[test]
    fn wraparound_keeps_newest_window(capacity in 1usize..32, extra in 0usize..32) {
        prop_assume!(extra < capacity);
        let ring = SharedRing::with_capacity(capacity).unwrap();
        let total = capacity + extra;
        for delay in 0..total {
            ring.try_push(Cell::wait(delay));
        }

        let popped: Vec<_> = (0..capacity).filter_map(|_| ring.try_pop()).map(|c| c.delay).collect();
        prop_assert_eq!(popped, (extra..total).collect::<Vec<_>>());
        prop_assert_eq!(ring.dropped(), extra);
        prop_assert_eq!(ring.status(), Status::Stopped);
    }

    #[test]
    fn indices_never_reach_capacity(capacity in 1usize..16, ops in prop::collection::vec(any::<bool>(), 0..200)) {
        let ring = SharedRing::with_capacity(capacity).unwrap();
        for (i, push) in ops.into_iter().enumerate() {
            if push {
                ring.try_push(Cell::wait(i));
            } else if !ring.is_empty() {
                ring.try_pop();
            }
            prop_assert!(ring.read_index() < capacity);
            prop_assert!(ring.write_index() < capacity);
            prop_assert!(ring.len() <= capacity);
        }
    }
}

#[test]
fn test_concurrent_producer_consumer_in_order() {
    const TOTAL: usize = 200_000;
    let ring = SharedRing::with_capacity(64).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for delay in 0..TOTAL {
                // Stay behind the consumer so nothing is overwritten
                while ring.len() >= ring.capacity() {
                    std::hint::spin_loop();
                }
                ring.try_push(Cell::new(delay, delay ^ 1, delay));
            }
            done.store(true, Ordering::Release);
        });

        let mut expected = 0;
        while expected < TOTAL {
            if ring.is_empty() {
                std::hint::spin_loop();
                continue;
            }
            let cell = ring.try_pop().expect("pending cell");
            assert_eq!(cell, Cell::new(expected, expected ^ 1, expected));
            expected += 1;
        }
    });

    assert!(done.load(Ordering::Acquire));
    assert_eq!(ring.dropped(), 0);
    assert_ne!(ring.status(), Status::Underrun);
}

#[test]
fn test_lapping_producer_never_yields_torn_cells() {
    const TOTAL: usize = 100_000;
    let ring = SharedRing::with_capacity(8).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for n in 1..=TOTAL {
                ring.try_push(Cell::new(n, n, n));
            }
            done.store(true, Ordering::Release);
        });

        let mut last = 0;
        while !done.load(Ordering::Acquire) {
            if ring.is_empty() {
                continue;
            }
            match ring.try_pop() {
                Some(cell) => {
                    assert_eq!(cell.delay, cell.clear_mask);
                    assert_eq!(cell.delay, cell.set_mask);
                    assert!(cell.delay > last, "cells must come out in push order");
                    last = cell.delay;
                }
                None => {
                    // Resync gave up behind the producer; clear the latch and continue
                    assert_eq!(ring.status(), Status::Underrun);
                    ring.set_status(Status::Stopped);
                }
            }
        }
    });
}
