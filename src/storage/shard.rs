//! A Single Keyspace Partition
//!
//! A [`Shard`] holds three maps keyed by the same keys: strings, hashes and
//! deadlines. All three live behind one `RwLock`, so every operation is
//! atomic with respect to every other operation on the same shard.
//!
//! ## Locking
//!
//! Read-only operations take the read lock. If the key turns out to be
//! expired they drop it, take the write lock, re-check, and evict before
//! answering (lazy expiry). Mutations always take the write lock.
//!
//! ## Kinds
//!
//! A key holds either a string or a hash, never both. `set` supersedes any
//! hash under the key. Every other operation checks the key's kind under the
//! same guard it works with and fails with [`WrongType`] without touching
//! state, so a concurrent `set` can never slip in between check and write.
//!
//! ## Deadlines
//!
//! A deadline only exists while its key does. Deleting, evicting or
//! overwriting a key with `set`, and removing the last field of a hash,
//! all clear it.

use crate::storage::heap::ExpiryHeap;
use crate::storage::ttl::{self, ExpiryMode, ExpiryTable, TTL_NO_KEY, TTL_NO_TTL};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// The key holds a value of the other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key holds the wrong kind of value")]
pub struct WrongType;

/// The kind of value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    None,
    String,
    Hash,
}

impl ValueType {
    /// Name as reported by the TYPE command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::None => "none",
            ValueType::String => "string",
            ValueType::Hash => "hash",
        }
    }
}

#[derive(Debug, Default)]
struct ShardState {
    strings: HashMap<Bytes, Bytes>,
    hashes: HashMap<Bytes, HashMap<Bytes, Bytes>>,
    expiry: ExpiryTable,
    /// Present only in heap mode.
    index: Option<ExpiryHeap>,
}

impl ShardState {
    #[inline]
    fn is_expired(&self, key: &[u8], now: Instant) -> bool {
        self.expiry.is_expired(key, now)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.strings.contains_key(key) || self.hashes.contains_key(key)
    }

    fn type_of(&self, key: &[u8]) -> ValueType {
        if self.strings.contains_key(key) {
            ValueType::String
        } else if self.hashes.contains_key(key) {
            ValueType::Hash
        } else {
            ValueType::None
        }
    }

    /// Fails unless `key` is absent or holds `kind`.
    fn expect_kind(&self, key: &[u8], kind: ValueType) -> Result<(), WrongType> {
        match self.type_of(key) {
            ValueType::None => Ok(()),
            found if found == kind => Ok(()),
            _ => Err(WrongType),
        }
    }

    fn set_deadline(&mut self, key: Bytes, at: Instant) {
        if let Some(index) = self.index.as_mut() {
            index.set(key.clone(), at);
        }
        self.expiry.set(key, at);
    }

    fn clear_deadline(&mut self, key: &[u8]) -> bool {
        let had = self.expiry.clear(key);
        if had {
            if let Some(index) = self.index.as_mut() {
                index.clear(key);
            }
        }
        had
    }

    /// Removes every trace of `key`. Returns whether a value was present.
    fn remove(&mut self, key: &[u8]) -> bool {
        let string = self.strings.remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        self.clear_deadline(key);
        string || hash
    }

    /// Evicts `key` if its deadline has passed.
    fn evict_if_expired(&mut self, key: &[u8], now: Instant) -> bool {
        if self.is_expired(key, now) {
            self.remove(key);
            true
        } else {
            false
        }
    }

    fn insert_string(&mut self, key: Bytes, value: Bytes) {
        self.hashes.remove(&key);
        self.clear_deadline(&key);
        self.strings.insert(key, value);
    }
}

/// An independently locked partition of the keyspace.
#[derive(Debug)]
pub struct Shard {
    state: RwLock<ShardState>,
}

impl Default for Shard {
    fn default() -> Self {
        Self::new(ExpiryMode::default())
    }
}

impl Shard {
    /// Creates an empty shard using the given expiry index strategy.
    pub fn new(mode: ExpiryMode) -> Self {
        let index = match mode {
            ExpiryMode::Linear => None,
            ExpiryMode::Heap => Some(ExpiryHeap::new()),
        };
        Self {
            state: RwLock::new(ShardState {
                index,
                ..ShardState::default()
            }),
        }
    }

    /// Runs `f` against a view in which `key` is not expired at `now`.
    ///
    /// Fast path under the read lock; slow path evicts under the write lock.
    fn read_live<R>(&self, key: &[u8], now: Instant, f: impl FnOnce(&ShardState) -> R) -> R {
        {
            let state = self.state.read();
            if !state.is_expired(key, now) {
                return f(&*state);
            }
        }

        let mut state = self.state.write();
        state.evict_if_expired(key, now);
        f(&*state)
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Returns the string stored under `key`, evicting it first if expired.
    pub fn get(&self, key: &[u8], now: Instant) -> Result<Option<Bytes>, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::String)?;
            Ok(state.strings.get(key).cloned())
        })
    }

    /// Stores a string, dropping any hash and any deadline under the key.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.state.write().insert_string(key, value);
    }

    /// Stores a string together with its deadline under a single lock.
    pub fn set_with_deadline(&self, key: Bytes, value: Bytes, at: Instant) {
        let mut state = self.state.write();
        state.insert_string(key.clone(), value);
        state.set_deadline(key, at);
    }

    /// Removes the key whatever its kind.
    ///
    /// Returns `false` for absent keys and for keys that had already expired.
    pub fn del(&self, key: &[u8], now: Instant) -> bool {
        let mut state = self.state.write();
        if state.evict_if_expired(key, now) {
            return false;
        }
        state.remove(key)
    }

    // ========================================================================
    // TTL OPERATIONS
    // ========================================================================

    /// Installs or replaces the deadline of an existing key.
    ///
    /// Returns `false`, and does nothing, when the key is absent or expired.
    pub fn set_expire(&self, key: &[u8], at: Instant, now: Instant) -> bool {
        let mut state = self.state.write();
        state.evict_if_expired(key, now);
        if !state.contains(key) {
            return false;
        }
        state.set_deadline(Bytes::copy_from_slice(key), at);
        true
    }

    /// Removes the key's deadline, leaving the value alone.
    ///
    /// Returns whether a deadline was actually removed.
    pub fn clear_expire(&self, key: &[u8], now: Instant) -> bool {
        let mut state = self.state.write();
        if state.evict_if_expired(key, now) {
            return false;
        }
        state.clear_deadline(key)
    }

    /// `-2` if absent or expired, `-1` without a deadline, otherwise the
    /// remaining milliseconds rounded up.
    pub fn ttl_ms(&self, key: &[u8], now: Instant) -> i64 {
        self.read_live(key, now, |state| {
            if !state.contains(key) {
                return TTL_NO_KEY;
            }
            match state.expiry.get(key) {
                Some(at) => ttl::remaining_ms(at, now),
                None => TTL_NO_TTL,
            }
        })
    }

    /// Kind of value under `key`, evicting it first if expired.
    pub fn type_of(&self, key: &[u8], now: Instant) -> ValueType {
        self.read_live(key, now, |state| state.type_of(key))
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Sets each field/value pair, creating the hash if needed.
    ///
    /// Returns the number of fields that were newly created.
    pub fn hset(
        &self,
        key: Bytes,
        pairs: &[(Bytes, Bytes)],
        now: Instant,
    ) -> Result<usize, WrongType> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.evict_if_expired(&key, now);
        state.expect_kind(&key, ValueType::Hash)?;

        let hash = state.hashes.entry(key).or_default();
        Ok(pairs
            .iter()
            .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
            .count())
    }

    pub fn hget(&self, key: &[u8], field: &[u8], now: Instant) -> Result<Option<Bytes>, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::Hash)?;
            Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
        })
    }

    /// One entry per requested field, `None` where it is missing.
    pub fn hmget(
        &self,
        key: &[u8],
        fields: &[Bytes],
        now: Instant,
    ) -> Result<Vec<Option<Bytes>>, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::Hash)?;
            Ok(match state.hashes.get(key) {
                Some(hash) => fields.iter().map(|f| hash.get(f).cloned()).collect(),
                None => vec![None; fields.len()],
            })
        })
    }

    /// Removes the given fields. Removing the last field removes the hash
    /// and its deadline. Returns how many fields were removed.
    pub fn hdel(&self, key: &[u8], fields: &[Bytes], now: Instant) -> Result<usize, WrongType> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.evict_if_expired(key, now);
        state.expect_kind(key, ValueType::Hash)?;

        let Some(hash) = state.hashes.get_mut(key) else {
            return Ok(0);
        };
        let removed = fields
            .iter()
            .filter(|field| hash.remove(&field[..]).is_some())
            .count();

        if hash.is_empty() {
            state.hashes.remove(key);
            state.clear_deadline(key);
        }
        Ok(removed)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8], now: Instant) -> Result<bool, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::Hash)?;
            Ok(state
                .hashes
                .get(key)
                .is_some_and(|h| h.contains_key(field)))
        })
    }

    pub fn hlen(&self, key: &[u8], now: Instant) -> Result<usize, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::Hash)?;
            Ok(state.hashes.get(key).map_or(0, |h| h.len()))
        })
    }

    /// All field/value pairs, in no particular order.
    pub fn hgetall(&self, key: &[u8], now: Instant) -> Result<Vec<(Bytes, Bytes)>, WrongType> {
        self.read_live(key, now, |state| {
            state.expect_kind(key, ValueType::Hash)?;
            Ok(state
                .hashes
                .get(key)
                .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
                .unwrap_or_default())
        })
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Evicts every key whose deadline is at or before `now`.
    ///
    /// Returns the number of keys evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let due = match state.index.as_mut() {
            Some(index) => {
                let mut due = Vec::new();
                index.sweep_due(now, |key| due.push(key));
                due
            }
            None => state.expiry.due(now),
        };

        let mut evicted = 0;
        for key in due {
            // The heap is only an index; the table decides.
            if state.evict_if_expired(&key, now) {
                evicted += 1;
            }
        }
        evicted
    }

    /// Earliest deadline tracked by this shard.
    pub fn next_due(&self) -> Option<Instant> {
        {
            let state = self.state.read();
            if state.index.is_none() {
                return state.expiry.next_due();
            }
        }
        self.state
            .write()
            .index
            .as_mut()
            .and_then(|index| index.next_due())
    }

    /// Number of keys held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.strings.len() + state.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys that carry a deadline.
    pub fn expiring(&self) -> usize {
        self.state.read().expiry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(Bytes, Bytes)> {
        items.iter().map(|(f, v)| (b(f), b(v))).collect()
    }

    fn both_modes() -> [Shard; 2] {
        [Shard::new(ExpiryMode::Linear), Shard::new(ExpiryMode::Heap)]
    }

    #[test]
    fn test_set_get_del() {
        let shard = Shard::default();
        let now = Instant::now();

        shard.set(b("k"), b("v"));
        assert_eq!(shard.get(b"k", now), Ok(Some(b("v"))));
        assert_eq!(shard.type_of(b"k", now), ValueType::String);

        assert!(shard.del(b"k", now));
        assert!(!shard.del(b"k", now));
        assert_eq!(shard.get(b"k", now), Ok(None));
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_KEY);
    }

    #[test]
    fn test_ttl_states() {
        let shard = Shard::default();
        let now = Instant::now();

        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_KEY);
        shard.set(b("k"), b("v"));
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_TTL);

        assert!(shard.set_expire(b"k", now + Duration::from_millis(1500), now));
        assert_eq!(shard.ttl_ms(b"k", now), 1500);
        assert_eq!(
            shard.ttl_ms(b"k", now + Duration::from_micros(500_500)),
            1000
        );
    }

    #[test]
    fn test_lazy_eviction_on_read() {
        for shard in both_modes() {
            let now = Instant::now();
            shard.set_with_deadline(b("k"), b("v"), now + Duration::from_millis(10));

            assert_eq!(shard.get(b"k", now), Ok(Some(b("v"))));
            assert_eq!(shard.len(), 1);

            let later = now + Duration::from_millis(10);
            assert_eq!(shard.get(b"k", later), Ok(None));
            assert_eq!(shard.len(), 0);
            assert_eq!(shard.expiring(), 0);
            assert_eq!(shard.type_of(b"k", later), ValueType::None);
        }
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let shard = Shard::default();
        let now = Instant::now();
        shard.set_with_deadline(b("k"), b("v"), now);
        assert_eq!(shard.get(b"k", now), Ok(None));
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_KEY);
    }

    #[test]
    fn test_set_clears_previous_deadline_and_hash() {
        let shard = Shard::default();
        let now = Instant::now();

        shard.hset(b("k"), &pairs(&[("f", "v")]), now).unwrap();
        shard.set_expire(b"k", now + Duration::from_secs(5), now);

        shard.set(b("k"), b("s"));
        assert_eq!(shard.type_of(b"k", now), ValueType::String);
        assert_eq!(shard.hlen(b"k", now), Err(WrongType));
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_TTL);
    }

    #[test]
    fn test_wrong_kind_is_rejected_without_mutation() {
        let shard = Shard::default();
        let now = Instant::now();
        let deadline = now + Duration::from_secs(5);

        shard.set_with_deadline(b("s"), b("x"), deadline);
        assert_eq!(shard.hset(b("s"), &pairs(&[("f", "v")]), now), Err(WrongType));
        assert_eq!(shard.hget(b"s", b"f", now), Err(WrongType));
        assert_eq!(shard.hmget(b"s", &[b("f")], now), Err(WrongType));
        assert_eq!(shard.hdel(b"s", &[b("f")], now), Err(WrongType));
        assert_eq!(shard.hexists(b"s", b"f", now), Err(WrongType));
        assert_eq!(shard.hlen(b"s", now), Err(WrongType));
        assert_eq!(shard.hgetall(b"s", now), Err(WrongType));
        assert_eq!(shard.get(b"s", now), Ok(Some(b("x"))));
        assert_eq!(shard.ttl_ms(b"s", now), 5000);

        shard.hset(b("h"), &pairs(&[("f", "v")]), now).unwrap();
        assert_eq!(shard.get(b"h", now), Err(WrongType));
        assert_eq!(shard.hlen(b"h", now), Ok(1));
    }

    #[test]
    fn test_expired_string_does_not_block_hset() {
        let shard = Shard::default();
        let now = Instant::now();

        shard.set_with_deadline(b("k"), b("s"), now);
        assert_eq!(shard.hset(b("k"), &pairs(&[("f", "v")]), now), Ok(1));
        assert_eq!(shard.type_of(b"k", now), ValueType::Hash);
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_TTL);
    }

    #[test]
    fn test_concurrent_set_and_hset_stay_consistent() {
        use std::sync::{Arc, Barrier};

        let shard = Arc::new(Shard::default());
        for _ in 0..2_000 {
            let now = Instant::now();
            shard.del(b"k", now);
            let barrier = Arc::new(Barrier::new(2));

            let setter = {
                let shard = Arc::clone(&shard);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    shard.set(b("k"), b("x"));
                })
            };
            let hsetter = {
                let shard = Arc::clone(&shard);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    shard.hset(b("k"), &pairs(&[("f", "v")]), Instant::now())
                })
            };

            setter.join().unwrap();
            let hset = hsetter.join().unwrap();

            // Either HSET ran first and SET overwrote it, or HSET saw the
            // string and refused. The key always ends up a string.
            assert!(matches!(hset, Ok(1) | Err(WrongType)));
            assert_eq!(shard.type_of(b"k", Instant::now()), ValueType::String);
            assert_eq!(shard.get(b"k", Instant::now()), Ok(Some(b("x"))));
        }
    }

    #[test]
    fn test_expire_on_missing_key_is_ignored() {
        let shard = Shard::default();
        let now = Instant::now();
        assert!(!shard.set_expire(b"nope", now + Duration::from_secs(1), now));
        assert_eq!(shard.expiring(), 0);
        assert_eq!(shard.ttl_ms(b"nope", now), TTL_NO_KEY);
    }

    #[test]
    fn test_clear_expire() {
        let shard = Shard::default();
        let now = Instant::now();
        shard.set(b("k"), b("v"));
        assert!(!shard.clear_expire(b"k", now));

        shard.set_expire(b"k", now + Duration::from_secs(1), now);
        assert!(shard.clear_expire(b"k", now));
        assert_eq!(shard.ttl_ms(b"k", now), TTL_NO_TTL);
        assert_eq!(shard.get(b"k", now + Duration::from_secs(2)), Ok(Some(b("v"))));
    }

    #[test]
    fn test_del_of_expired_key_reports_nothing() {
        let shard = Shard::default();
        let now = Instant::now();
        shard.set_with_deadline(b("k"), b("v"), now);
        assert!(!shard.del(b"k", now));
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn test_hash_operations() {
        let shard = Shard::default();
        let now = Instant::now();

        assert_eq!(shard.hset(b("h"), &pairs(&[("f1", "v1")]), now), Ok(1));
        assert_eq!(shard.hset(b("h"), &pairs(&[("f1", "v2")]), now), Ok(0));
        assert_eq!(
            shard.hset(b("h"), &pairs(&[("f2", "a"), ("f3", "b"), ("f1", "c")]), now),
            Ok(2)
        );

        assert_eq!(shard.hget(b"h", b"f1", now), Ok(Some(b("c"))));
        assert_eq!(shard.hget(b"h", b"zz", now), Ok(None));
        assert_eq!(shard.hexists(b"h", b"f2", now), Ok(true));
        assert_eq!(shard.hexists(b"h", b"zz", now), Ok(false));
        assert_eq!(shard.hlen(b"h", now), Ok(3));
        assert_eq!(
            shard.hmget(b"h", &[b("f2"), b("zz")], now),
            Ok(vec![Some(b("a")), None])
        );
        assert_eq!(shard.hmget(b"none", &[b("f")], now), Ok(vec![None]));

        let mut all = shard.hgetall(b"h", now).unwrap();
        all.sort();
        assert_eq!(all, pairs(&[("f1", "c"), ("f2", "a"), ("f3", "b")]));
    }

    #[test]
    fn test_hdel_last_field_removes_hash_and_deadline() {
        let shard = Shard::default();
        let now = Instant::now();

        shard.hset(b("h"), &pairs(&[("f1", "v1"), ("f2", "v2")]), now).unwrap();
        shard.set_expire(b"h", now + Duration::from_secs(10), now);

        assert_eq!(shard.hdel(b"h", &[b("f1"), b("missing")], now), Ok(1));
        assert_eq!(shard.type_of(b"h", now), ValueType::Hash);

        assert_eq!(shard.hdel(b"h", &[b("f2")], now), Ok(1));
        assert_eq!(shard.type_of(b"h", now), ValueType::None);
        assert_eq!(shard.expiring(), 0);
        assert_eq!(shard.hdel(b"h", &[b("f2")], now), Ok(0));
    }

    #[test]
    fn test_sweep_evicts_due_keys_in_both_modes() {
        for shard in both_modes() {
            let now = Instant::now();
            shard.set_with_deadline(b("a"), b("1"), now + Duration::from_millis(5));
            shard.hset(b("h"), &pairs(&[("f", "v")]), now).unwrap();
            shard.set_expire(b"h", now + Duration::from_millis(5), now);
            shard.set_with_deadline(b("later"), b("2"), now + Duration::from_secs(60));
            shard.set(b("forever"), b("3"));

            assert_eq!(shard.sweep(now), 0);
            assert_eq!(shard.sweep(now + Duration::from_millis(5)), 2);
            assert_eq!(shard.len(), 2);
            assert_eq!(shard.expiring(), 1);
            assert_eq!(shard.next_due(), Some(now + Duration::from_secs(60)));
        }
    }

    #[test]
    fn test_heap_mode_survives_rescheduling() {
        let shard = Shard::new(ExpiryMode::Heap);
        let now = Instant::now();

        shard.set_with_deadline(b("k"), b("v"), now + Duration::from_millis(10));
        shard.set_expire(b"k", now + Duration::from_millis(100), now);

        assert_eq!(shard.next_due(), Some(now + Duration::from_millis(100)));
        assert_eq!(shard.sweep(now + Duration::from_millis(50)), 0);
        assert_eq!(shard.get(b"k", now + Duration::from_millis(50)), Ok(Some(b("v"))));
        assert_eq!(shard.sweep(now + Duration::from_millis(100)), 1);
        assert_eq!(shard.next_due(), None);
    }

    #[test]
    fn test_heap_mode_persist_cancels_schedule() {
        let shard = Shard::new(ExpiryMode::Heap);
        let now = Instant::now();

        shard.set_with_deadline(b("k"), b("v"), now + Duration::from_millis(10));
        assert!(shard.clear_expire(b"k", now));
        assert_eq!(shard.next_due(), None);
        assert_eq!(shard.sweep(now + Duration::from_secs(1)), 0);
        assert_eq!(shard.len(), 1);
    }
}
