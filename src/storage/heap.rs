//! Generation-Tagged Expiry Heap
//!
//! A min-heap of `(when, key, generation)` entries used as an index over a
//! shard's deadlines. Entries are never removed from the middle of the heap.
//! Instead every `set` or `clear` bumps a global generation counter and
//! records the key's *current* generation. A heap entry whose generation no
//! longer matches is stale and is dropped whenever it reaches the top.
//!
//! ```text
//!   set(k, t1)  -> push (t1, k, g1)      gens[k] = g1
//!   set(k, t2)  -> push (t2, k, g2)      gens[k] = g2   (g1 entry now stale)
//!   clear(k)    ->                       gens.remove(k) (g2 entry now stale)
//! ```
//!
//! Insertion and pop are O(log n). Stale entries cost one extra pop each,
//! which amortizes against the `set`/`clear` that created them. Stale
//! entries with distant deadlines would otherwise pile up, so once they
//! outnumber the current ones (plus [`COMPACT_SLACK`]) the heap is rebuilt
//! from its current entries. Each rebuild is paid for by the stale entries
//! that triggered it.
//!
//! The heap is advisory. Keys reported by [`ExpiryHeap::sweep_due`] must be
//! checked against the shard's authoritative [`ExpiryTable`] before eviction.
//!
//! [`ExpiryTable`]: crate::storage::ttl::ExpiryTable

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Stale nodes tolerated beyond the number of current ones.
pub const COMPACT_SLACK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    when: Instant,
    generation: u64,
    key: Bytes,
}

// BinaryHeap is a max-heap; reverse so the earliest deadline sits on top.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct ExpiryHeap {
    heap: BinaryHeap<HeapEntry>,
    /// Current generation per key with a live deadline.
    gens: HashMap<Bytes, u64>,
    next_gen: u64,
}

impl ExpiryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` at `when`, superseding any earlier schedule.
    pub fn set(&mut self, key: Bytes, when: Instant) {
        let generation = self.bump();
        self.gens.insert(key.clone(), generation);
        self.heap.push(HeapEntry {
            when,
            generation,
            key,
        });
        self.maybe_compact();
    }

    /// Forgets the schedule for `key`. Its heap entries become stale.
    pub fn clear(&mut self, key: &[u8]) {
        self.bump();
        self.gens.remove(key);
        self.maybe_compact();
    }

    /// Pops every current entry due at `now`, calling `on_expire` once per
    /// key. Stale entries are skipped. Returns how many keys were reported.
    pub fn sweep_due<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(Bytes),
    {
        let mut reported = 0;
        while let Some(top) = self.heap.peek() {
            if top.when > now {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            if self.is_current(&entry) {
                self.gens.remove(&entry.key);
                on_expire(entry.key);
                reported += 1;
            }
        }
        reported
    }

    /// Earliest current deadline, discarding stale tops on the way.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|entry| entry.when)
    }

    /// Drops stale entries from the top of the heap.
    pub fn prune(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_current(top) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Number of heap nodes, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of keys with a current schedule.
    pub fn tracked(&self) -> usize {
        self.gens.len()
    }

    /// Rebuilds the heap from current entries once stale ones dominate.
    fn maybe_compact(&mut self) {
        if self.heap.len() <= 2 * self.gens.len() + COMPACT_SLACK {
            return;
        }
        let gens = &self.gens;
        self.heap
            .retain(|entry| gens.get(&entry.key) == Some(&entry.generation));
    }

    fn is_current(&self, entry: &HeapEntry) -> bool {
        self.gens.get(&entry.key) == Some(&entry.generation)
    }

    fn bump(&mut self) -> u64 {
        self.next_gen += 1;
        self.next_gen
    }
}
