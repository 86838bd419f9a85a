//! Per-thread block-start table
//!
//! Ephemeral record of when each thread went off-processor: a fixed-
//! capacity, lock-free open-addressing map from thread id to block-start
//! timestamp. Allocated once at construction; the hot path never
//! allocates, blocks, or takes a lock.
//!
//! Invariant: at most one pending interval per thread id. The scheduler
//! owns a thread on exactly one processor at any instant, so operations
//! for the *same* tid are never concurrent; operations for distinct tids
//! run fully in parallel.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use fnv::FnvHasher;

use crate::error::DropReason;

/// Default capacity, matching the aggregation table.
pub const START_CAPACITY: usize = 10_240;

// Slot lifecycle: EMPTY -> RESERVED -> OCCUPIED -> TOMBSTONE, with
// TOMBSTONE reusable by a later insert. A slot never returns to EMPTY,
// which is what lets probes stop at the first EMPTY they see.
const EMPTY: u8 = 0;
const RESERVED: u8 = 1;
const OCCUPIED: u8 = 2;
const TOMBSTONE: u8 = 3;

struct Slot {
    state: AtomicU8,
    tid: AtomicU32,
    start_ns: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            tid: AtomicU32::new(0),
            start_ns: AtomicU64::new(0),
        }
    }
}

/// Fixed-capacity tid -> block-start-ns map.
pub struct StartTimeTable {
    slots: Box<[Slot]>,
    len: AtomicUsize,
}

impl StartTimeTable {
    /// Allocate a table with the given capacity. This is the only
    /// allocation the table ever performs.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "start table capacity must be > 0");
        let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    /// Number of pending intervals currently tracked.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether no intervals are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe_start(&self, tid: u32) -> usize {
        let mut hasher = FnvHasher::default();
        tid.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    /// Record that `tid` went off-processor at `ts_ns`. Insert-if-absent:
    /// an existing entry wins, protecting the original start time against
    /// spurious repeated switch-out notifications. A full table drops the
    /// pending interval; the later switch-in then observes no start.
    pub fn record_block_start(&self, tid: u32, ts_ns: u64) -> Result<(), DropReason> {
        let start = self.probe_start(tid);
        let cap = self.slots.len();

        'retry: loop {
            let mut claimable: Option<usize> = None;

            for i in 0..cap {
                let idx = (start + i) % cap;
                let slot = &self.slots[idx];
                match slot.state.load(Ordering::Acquire) {
                    OCCUPIED => {
                        if slot.tid.load(Ordering::Relaxed) == tid {
                            // Already pending: keep the first start time.
                            return Ok(());
                        }
                    }
                    EMPTY => {
                        // tid cannot live past the first EMPTY slot.
                        if claimable.is_none() {
                            claimable = Some(idx);
                        }
                        break;
                    }
                    TOMBSTONE => {
                        if claimable.is_none() {
                            claimable = Some(idx);
                        }
                    }
                    _ => {
                        // RESERVED: another processor is mid-insert for a
                        // different tid. The window is a handful of plain
                        // stores; wait it out and rescan.
                        std::hint::spin_loop();
                        continue 'retry;
                    }
                }
            }

            let Some(idx) = claimable else {
                return Err(DropReason::CapacityExceeded);
            };

            let slot = &self.slots[idx];
            let seen = slot.state.load(Ordering::Acquire);
            if seen != EMPTY && seen != TOMBSTONE {
                continue 'retry;
            }
            if slot
                .state
                .compare_exchange(seen, RESERVED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue 'retry;
            }

            slot.tid.store(tid, Ordering::Relaxed);
            slot.start_ns.store(ts_ns, Ordering::Relaxed);
            slot.state.store(OCCUPIED, Ordering::Release);
            self.len.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    }

    /// Atomic lookup-and-unconditional-delete of `tid`'s pending start.
    /// Returns `None` when untracked (filtered out, or the table was full
    /// when the switch-out arrived).
    pub fn consume_block_start(&self, tid: u32) -> Option<u64> {
        let start = self.probe_start(tid);
        let cap = self.slots.len();

        for i in 0..cap {
            let idx = (start + i) % cap;
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Acquire) {
                OCCUPIED => {
                    if slot.tid.load(Ordering::Relaxed) == tid {
                        let ts = slot.start_ns.load(Ordering::Relaxed);
                        // Same-tid calls are never concurrent (single-
                        // processor ownership), so a plain retire suffices.
                        slot.state.store(TOMBSTONE, Ordering::Release);
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        return Some(ts);
                    }
                }
                EMPTY => return None,
                // TOMBSTONE and RESERVED slots may sit in the middle of
                // tid's probe chain; keep scanning.
                _ => {}
            }
        }

        None
    }
}
