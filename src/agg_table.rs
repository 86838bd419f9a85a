//! Blocked-time aggregation table
//!
//! The accumulation sink: a fixed-capacity, lock-free open-addressing map
//! from [`WaitKey`] to cumulative blocked nanoseconds. The hot path gets
//! exactly two primitives, race-free insert-if-absent and atomic add on
//! the value cell. On capacity exhaustion an absent key is rejected and
//! the delta discarded: never block, never evict, accept bounded
//! measurement loss instead.
//!
//! Entries are only removed by the external drain pass (read-resets); the
//! hot path itself never deletes.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::error::DropReason;
use crate::key::{CommName, WaitKey};

/// Default capacity of the aggregation table.
pub const COUNTS_CAPACITY: usize = 10_240;

// Slot lifecycle: EMPTY -> RESERVED -> OCCUPIED -> TOMBSTONE, tombstones
// reusable by later inserts, never back to EMPTY. Probes stop at the
// first EMPTY slot.
const EMPTY: u8 = 0;
const RESERVED: u8 = 1;
const OCCUPIED: u8 = 2;
const TOMBSTONE: u8 = 3;

struct Slot {
    state: AtomicU8,
    tid: AtomicU32,
    tgid: AtomicU32,
    user_stack_id: AtomicI64,
    kernel_stack_id: AtomicI64,
    comm: [AtomicU64; 2],
    total_ns: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            tid: AtomicU32::new(0),
            tgid: AtomicU32::new(0),
            user_stack_id: AtomicI64::new(0),
            kernel_stack_id: AtomicI64::new(0),
            comm: [AtomicU64::new(0), AtomicU64::new(0)],
            total_ns: AtomicU64::new(0),
        }
    }

    /// Field loads are Relaxed: callers only read after an Acquire load
    /// observed OCCUPIED, which pairs with the inserter's Release publish.
    fn matches(&self, key: &WaitKey) -> bool {
        let words = key.comm.to_words();
        self.tid.load(Ordering::Relaxed) == key.tid
            && self.tgid.load(Ordering::Relaxed) == key.tgid
            && self.user_stack_id.load(Ordering::Relaxed) == key.user_stack_id
            && self.kernel_stack_id.load(Ordering::Relaxed) == key.kernel_stack_id
            && self.comm[0].load(Ordering::Relaxed) == words[0]
            && self.comm[1].load(Ordering::Relaxed) == words[1]
    }

    fn write_key(&self, key: &WaitKey) {
        let words = key.comm.to_words();
        self.tid.store(key.tid, Ordering::Relaxed);
        self.tgid.store(key.tgid, Ordering::Relaxed);
        self.user_stack_id.store(key.user_stack_id, Ordering::Relaxed);
        self.kernel_stack_id
            .store(key.kernel_stack_id, Ordering::Relaxed);
        self.comm[0].store(words[0], Ordering::Relaxed);
        self.comm[1].store(words[1], Ordering::Relaxed);
    }

    fn read_key(&self) -> WaitKey {
        WaitKey {
            tid: self.tid.load(Ordering::Relaxed),
            tgid: self.tgid.load(Ordering::Relaxed),
            user_stack_id: self.user_stack_id.load(Ordering::Relaxed),
            kernel_stack_id: self.kernel_stack_id.load(Ordering::Relaxed),
            comm: CommName::from_words([
                self.comm[0].load(Ordering::Relaxed),
                self.comm[1].load(Ordering::Relaxed),
            ]),
        }
    }
}

/// One drained or snapshotted aggregation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEntry {
    /// The composite aggregation key.
    pub key: WaitKey,
    /// Cumulative blocked time attributed to the key, nanoseconds.
    pub total_ns: u64,
}

/// Fixed-capacity WaitKey -> cumulative-ns map.
pub struct AggregationTable {
    slots: Box<[Slot]>,
    len: AtomicUsize,
}

impl AggregationTable {
    /// Allocate a table with the given capacity; this is the only
    /// allocation the table ever performs.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "aggregation table capacity must be > 0");
        let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Accumulate `delta_ns` onto `key`: get-or-insert-zero, then atomic
    /// add. At capacity with `key` absent, the delta is discarded.
    ///
    /// Race-free under concurrent writers: two adds to the same key meet
    /// in one `fetch_add` cell, and two inserts of the same absent key
    /// converge on a single slot (the reservation loser rescans and lands
    /// on the winner's entry).
    pub fn add_duration(&self, key: &WaitKey, delta_ns: u64) -> Result<(), DropReason> {
        let cap = self.slots.len();
        let start = (key.probe_hash() as usize) % cap;

        'retry: loop {
            let mut claimable: Option<usize> = None;

            for i in 0..cap {
                let idx = (start + i) % cap;
                let slot = &self.slots[idx];
                match slot.state.load(Ordering::Acquire) {
                    OCCUPIED => {
                        if slot.matches(key) {
                            slot.total_ns.fetch_add(delta_ns, Ordering::Relaxed);
                            return Ok(());
                        }
                    }
                    EMPTY => {
                        // The key cannot live past the first EMPTY slot.
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
                        // RESERVED: an insert (possibly of this very key)
                        // is mid-publish a few stores away. Wait it out
                        // and rescan so same-key inserts converge.
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

            slot.write_key(key);
            slot.total_ns.store(delta_ns, Ordering::Relaxed);
            slot.state.store(OCCUPIED, Ordering::Release);
            self.len.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    }

    /// Non-destructive read of all resident entries. Reporting-path code;
    /// allocates.
    pub fn snapshot(&self) -> Vec<WaitEntry> {
        let mut out = Vec::with_capacity(self.len());
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) == OCCUPIED {
                out.push(WaitEntry {
                    key: slot.read_key(),
                    total_ns: slot.total_ns.load(Ordering::Relaxed),
                });
            }
        }
        out
    }

    /// Read-resets drain: read each resident entry out and retire its
    /// slot. One drain pass runs at a time (a single reporting consumer);
    /// hot-path adds may race it. Key and value are read while the slot
    /// is still OCCUPIED, so an insert can never reuse the slot under the
    /// reader; an add landing between the value swap and the retirement
    /// is bounded measurement loss, same class as the capacity policy.
    pub fn drain(&self) -> Vec<WaitEntry> {
        let mut out = Vec::with_capacity(self.len());
        for slot in self.slots.iter() {
            if slot.state.load(Ordering::Acquire) != OCCUPIED {
                continue;
            }
            let key = slot.read_key();
            let total_ns = slot.total_ns.swap(0, Ordering::Relaxed);
            if slot
                .state
                .compare_exchange(OCCUPIED, TOMBSTONE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                out.push(WaitEntry { key, total_ns });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CommName;

    fn key(tid: u32) -> WaitKey {
        WaitKey {
            tid,
            tgid: tid,
            user_stack_id: 100 + i64::from(tid),
            kernel_stack_id: 200 + i64::from(tid),
            comm: CommName::new("app"),
        }
    }

    #[test]
    fn test_add_creates_then_accumulates() {
        let table = AggregationTable::with_capacity(64);
        table.add_duration(&key(1), 500_000).unwrap();
        table.add_duration(&key(1), 250_000).unwrap();
        assert_eq!(table.len(), 1);

        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].key, key(1));
        assert_eq!(snap[0].total_ns, 750_000);
    }

    #[test]
    fn test_distinct_keys_get_distinct_slots() {
        let table = AggregationTable::with_capacity(64);
        for tid in 0..10 {
            table.add_duration(&key(tid), 1000).unwrap();
        }
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn test_capacity_law() {
        // N+1 distinct keys into capacity N: exactly N resident, the
        // (N+1)th observably lossy, nothing evicted.
        let table = AggregationTable::with_capacity(8);
        for tid in 0..8 {
            table.add_duration(&key(tid), 1000).unwrap();
        }
        assert_eq!(
            table.add_duration(&key(99), 1000),
            Err(DropReason::CapacityExceeded)
        );
        assert_eq!(table.len(), 8);

        // Existing keys still accumulate at capacity.
        table.add_duration(&key(3), 500).unwrap();
        let snap = table.snapshot();
        let entry = snap.iter().find(|e| e.key.tid == 3).unwrap();
        assert_eq!(entry.total_ns, 1500);
    }

    #[test]
    fn test_value_is_monotonically_nondecreasing() {
        let table = AggregationTable::with_capacity(16);
        let k = key(1);
        let mut last = 0;
        for delta in [1000, 2000, 3000] {
            table.add_duration(&k, delta).unwrap();
            let snap = table.snapshot();
            assert!(snap[0].total_ns >= last);
            last = snap[0].total_ns;
        }
        assert_eq!(last, 6000);
    }

    #[test]
    fn test_drain_empties_table() {
        let table = AggregationTable::with_capacity(64);
        table.add_duration(&key(1), 100).unwrap();
        table.add_duration(&key(2), 200).unwrap();

        let mut drained = table.drain();
        drained.sort_by_key(|e| e.key.tid);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].total_ns, 100);
        assert_eq!(drained[1].total_ns, 200);

        assert!(table.is_empty());
        assert!(table.drain().is_empty());
    }

    #[test]
    fn test_drained_slots_are_reusable() {
        let table = AggregationTable::with_capacity(4);
        for tid in 0..4 {
            table.add_duration(&key(tid), 10).unwrap();
        }
        assert_eq!(table.drain().len(), 4);

        // Full drain frees all slots for a new key population.
        for tid in 10..14 {
            table.add_duration(&key(tid), 20).unwrap();
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_reinsert_after_drain_starts_from_zero() {
        let table = AggregationTable::with_capacity(16);
        table.add_duration(&key(1), 5000).unwrap();
        table.drain();
        table.add_duration(&key(1), 700).unwrap();
        assert_eq!(table.snapshot()[0].total_ns, 700);
    }

    #[test]
    fn test_collision_chain_lookup() {
        // Capacity 2 forces both keys onto one chain.
        let table = AggregationTable::with_capacity(2);
        table.add_duration(&key(1), 10).unwrap();
        table.add_duration(&key(2), 20).unwrap();
        table.add_duration(&key(1), 1).unwrap();
        table.add_duration(&key(2), 2).unwrap();

        let mut snap = table.snapshot();
        snap.sort_by_key(|e| e.key.tid);
        assert_eq!(snap[0].total_ns, 11);
        assert_eq!(snap[1].total_ns, 22);
    }

    #[test]
    fn test_concurrent_same_key_converges_to_one_entry() {
        use std::sync::Arc;

        let table = Arc::new(AggregationTable::with_capacity(64));
        let k = key(7);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    table.add_duration(&k, 3).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot()[0].total_ns, 8 * 1000 * 3);
    }

    #[test]
    fn test_concurrent_distinct_keys_one_slot_each() {
        use std::sync::Arc;

        let table = Arc::new(AggregationTable::with_capacity(1024));
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    table.add_duration(&key(t * 100 + i), 5).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(table.len(), 8 * 50);
        for entry in table.snapshot() {
            assert_eq!(entry.total_ns, 5);
        }
    }
}
