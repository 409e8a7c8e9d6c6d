// dict.rs — Incremental-rehash hash table.
//
// Two bucket arrays sit side by side. Normally only the first is populated;
// during a resize the second holds the target table and a cursor records how
// many source buckets have been migrated. Every structural operation moves a
// bounded number of buckets, so a resize costs O(1) per call and lookups
// consult both tables until the cursor runs off the end.
//
// Growth triggers at load factor 1, but while a background snapshot child is
// alive resizing is disabled globally and only a load factor of
// `FORCE_RESIZE_RATIO` forces a grow anyway, keeping copy-on-write pages
// clean. Shrinking is never automatic; callers invoke [`Dict::resize`] when
// the fill ratio drops below [`Dict::needs_resize`]'s threshold.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::Rng;

/// Initial table size; always a power of two.
const INITIAL_SIZE: usize = 4;

/// Load factor that forces growth even while resize is disabled.
const FORCE_RESIZE_RATIO: usize = 5;

/// Empty buckets visited per migrated bucket before a rehash step gives up.
const EMPTY_VISITS_PER_STEP: usize = 10;

static DICT_CAN_RESIZE: AtomicBool = AtomicBool::new(true);

/// Serializes tests that flip the global resize flag; the parallel test
/// harness would otherwise interleave them.
#[cfg(test)]
pub(crate) static RESIZE_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Globally enables or disables proactive resizing. Disabled while a
/// snapshot child holds a copy-on-write view of the heap.
pub fn set_resize_enabled(enabled: bool) {
    DICT_CAN_RESIZE.store(enabled, Ordering::Relaxed);
}

pub fn resize_enabled() -> bool {
    DICT_CAN_RESIZE.load(Ordering::Relaxed)
}

struct Node<K, V> {
    key: K,
    val: V,
    next: Option<Box<Node<K, V>>>,
}

struct Table<K, V> {
    buckets: Vec<Option<Box<Node<K, V>>>>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn empty() -> Table<K, V> {
        Table { buckets: Vec::new(), used: 0 }
    }

    fn sized(size: usize) -> Table<K, V> {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        Table { buckets, used: 0 }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> usize {
        self.buckets.len().wrapping_sub(1)
    }
}

pub struct Dict<K, V> {
    ht: [Table<K, V>; 2],
    /// Index of the next source bucket to migrate; -1 when not rehashing.
    rehashidx: i64,
    hasher: RandomState,
}

fn next_power(size: usize) -> usize {
    let mut n = INITIAL_SIZE;
    while n < size {
        n <<= 1;
    }
    n
}

impl<K: Hash + Eq, V> Dict<K, V> {
    pub fn new() -> Dict<K, V> {
        Dict {
            ht: [Table::empty(), Table::empty()],
            rehashidx: -1,
            hasher: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket count across both tables.
    pub fn capacity(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehashidx != -1
    }

    fn hash_of<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }

    // -- rehash protocol ---------------------------------------------------

    /// Migrates up to `n` non-empty source buckets. Returns `true` while
    /// more work remains.
    pub fn rehash(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let mut empty_visits = n * EMPTY_VISITS_PER_STEP;
        let mut steps = n;
        while steps > 0 && self.ht[0].used > 0 {
            let idx = self.rehashidx as usize;
            debug_assert!(idx < self.ht[0].size());
            if self.ht[0].buckets[idx].is_none() {
                self.rehashidx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
                continue;
            }
            // Move every node of the chain to its target bucket.
            let mut chain = self.ht[0].buckets[idx].take();
            while let Some(mut node) = chain {
                chain = node.next.take();
                let target = (self.hash_of(&node.key) as usize) & self.ht[1].mask();
                node.next = self.ht[1].buckets[target].take();
                self.ht[1].buckets[target] = Some(node);
                self.ht[0].used -= 1;
                self.ht[1].used += 1;
            }
            self.rehashidx += 1;
            steps -= 1;
        }

        if self.ht[0].used == 0 {
            self.ht[0] = std::mem::replace(&mut self.ht[1], Table::empty());
            self.rehashidx = -1;
            return false;
        }
        true
    }

    /// Rehashes in bursts of 100 buckets until `millis` of wall clock have
    /// elapsed. Used by an idle tick.
    pub fn rehash_millis(&mut self, millis: u64) -> usize {
        let start = Instant::now();
        let mut rehashes = 0;
        while self.rehash(100) {
            rehashes += 100;
            if start.elapsed().as_millis() as u64 >= millis {
                break;
            }
        }
        rehashes
    }

    fn rehash_step(&mut self) {
        self.rehash(1);
    }

    /// Expands (or creates) the table to cover at least `size` entries.
    pub fn expand(&mut self, size: usize) {
        if self.is_rehashing() || self.ht[0].used > size {
            return;
        }
        let realsize = next_power(size);
        if realsize == self.ht[0].size() {
            return;
        }
        let new_table = Table::sized(realsize);
        if self.ht[0].size() == 0 {
            self.ht[0] = new_table;
        } else {
            self.ht[1] = new_table;
            self.rehashidx = 0;
        }
    }

    /// Shrinks the bucket array to the smallest power of two covering the
    /// current population. No-op while rehashing or while resize is
    /// disabled.
    pub fn resize(&mut self) {
        if !resize_enabled() || self.is_rehashing() {
            return;
        }
        let minimal = self.ht[0].used.max(INITIAL_SIZE);
        if next_power(minimal) >= self.ht[0].size() {
            return;
        }
        let new_table = Table::sized(next_power(minimal));
        self.ht[1] = new_table;
        self.rehashidx = 0;
    }

    /// Fill ratio below 10% with a non-trivial table size.
    pub fn needs_resize(&self) -> bool {
        let size = self.ht[0].size();
        size > INITIAL_SIZE && self.ht[0].used * 100 / size < 10
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.ht[0].size() == 0 {
            self.expand(INITIAL_SIZE);
            return;
        }
        let used = self.ht[0].used;
        let size = self.ht[0].size();
        if used >= size && (resize_enabled() || used / size > FORCE_RESIZE_RATIO) {
            self.expand(used * 2);
        }
    }

    // -- lookup ------------------------------------------------------------

    fn find_in<'a, Q>(table: &'a Table<K, V>, hash: u64, key: &Q) -> Option<&'a Node<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if table.size() == 0 {
            return None;
        }
        let mut cur = table.buckets[(hash as usize) & table.mask()].as_deref();
        while let Some(node) = cur {
            if node.key.borrow() == key {
                return Some(node);
            }
            cur = node.next.as_deref();
        }
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.len() == 0 {
            return None;
        }
        let hash = self.hash_of(key);
        if let Some(node) = Self::find_in(&self.ht[0], hash, key) {
            return Some(&node.val);
        }
        if self.is_rehashing() {
            if let Some(node) = Self::find_in(&self.ht[1], hash, key) {
                return Some(&node.val);
            }
        }
        None
    }

    fn find_mut_in<'a, Q>(table: &'a mut Table<K, V>, hash: u64, key: &Q) -> Option<&'a mut V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if table.size() == 0 {
            return None;
        }
        let idx = (hash as usize) & table.mask();
        let mut cur = table.buckets[idx].as_deref_mut();
        while let Some(node) = cur {
            if node.key.borrow() == key {
                return Some(&mut node.val);
            }
            cur = node.next.as_deref_mut();
        }
        None
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.len() == 0 {
            return None;
        }
        let hash = self.hash_of(key);
        let rehashing = self.is_rehashing();
        let (h0, h1) = self.ht.split_at_mut(1);
        if let Some(v) = Self::find_mut_in(&mut h0[0], hash, key) {
            return Some(v);
        }
        if rehashing {
            return Self::find_mut_in(&mut h1[0], hash, key);
        }
        None
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    // -- mutation ----------------------------------------------------------

    /// Inserts or replaces, returning the previous value when present.
    pub fn insert(&mut self, key: K, val: V) -> Option<V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed();
        let hash = self.hash_of(&key);

        // Replace in whichever table currently holds the key.
        let rehashing = self.is_rehashing();
        for i in 0..2 {
            if i == 1 && !rehashing {
                break;
            }
            let table = &mut self.ht[i];
            if table.size() == 0 {
                continue;
            }
            let idx = (hash as usize) & table.mask();
            let mut cur = table.buckets[idx].as_deref_mut();
            while let Some(node) = cur {
                if node.key == key {
                    return Some(std::mem::replace(&mut node.val, val));
                }
                cur = node.next.as_deref_mut();
            }
        }

        // New key: insert at the head of the target-table chain.
        let t = usize::from(rehashing);
        let idx = (hash as usize) & self.ht[t].mask();
        let next = self.ht[t].buckets[idx].take();
        self.ht[t].buckets[idx] = Some(Box::new(Node { key, val, next }));
        self.ht[t].used += 1;
        None
    }

    /// Inserts only when absent. Returns `false` (dropping `val`) when the
    /// key already exists.
    pub fn add(&mut self, key: K, val: V) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key, val);
        true
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Splices the matching node out of a chain.
    fn unchain<Q>(slot: &mut Option<Box<Node<K, V>>>, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match slot {
            None => None,
            Some(node) => {
                if node.key.borrow() == key {
                    let mut taken = slot.take().unwrap();
                    *slot = taken.next.take();
                    Some((taken.key, taken.val))
                } else {
                    Self::unchain(&mut node.next, key)
                }
            }
        }
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hash_of(key);
        let rehashing = self.is_rehashing();
        for i in 0..2 {
            if i == 1 && !rehashing {
                break;
            }
            let table = &mut self.ht[i];
            if table.size() == 0 {
                continue;
            }
            let idx = (hash as usize) & table.mask();
            if let Some(found) = Self::unchain(&mut table.buckets[idx], key) {
                table.used -= 1;
                return Some(found);
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.ht = [Table::empty(), Table::empty()];
        self.rehashidx = -1;
    }

    // -- iteration ---------------------------------------------------------

    /// Visits every entry. The borrow pins the table, so no rehash step can
    /// run mid-iteration and no entry is missed or repeated.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter { dict: self, table: 0, bucket: 0, node: None }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    // -- random sampling ---------------------------------------------------

    /// Approximately uniform random entry: pick a random non-empty bucket,
    /// then a random position in its chain.
    pub fn random_entry(&self) -> Option<(&K, &V)> {
        if self.len() == 0 {
            return None;
        }
        let mut rng = rand::rng();
        let node = loop {
            let chain = if self.is_rehashing() {
                // Buckets below the cursor are empty by construction.
                let s0 = self.ht[0].size();
                let total = s0 + self.ht[1].size();
                let base = self.rehashidx as usize;
                let h = base + rng.random_range(0..total - base);
                if h >= s0 {
                    self.ht[1].buckets[h - s0].as_deref()
                } else {
                    self.ht[0].buckets[h].as_deref()
                }
            } else {
                let idx = rng.random_range(0..self.ht[0].size());
                self.ht[0].buckets[idx].as_deref()
            };
            if let Some(head) = chain {
                break head;
            }
        };

        let mut chain_len = 0;
        let mut cur = Some(node);
        while let Some(n) = cur {
            chain_len += 1;
            cur = n.next.as_deref();
        }
        let mut pick = rng.random_range(0..chain_len);
        let mut cur = node;
        while pick > 0 {
            cur = cur.next.as_deref().unwrap();
            pick -= 1;
        }
        Some((&cur.key, &cur.val))
    }
}

impl<K: Hash + Eq, V> Default for Dict<K, V> {
    fn default() -> Dict<K, V> {
        Dict::new()
    }
}

pub struct Iter<'a, K, V> {
    dict: &'a Dict<K, V>,
    table: usize,
    bucket: usize,
    node: Option<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        loop {
            if let Some(node) = self.node {
                self.node = node.next.as_deref();
                return Some((&node.key, &node.val));
            }
            while self.table < 2 {
                let t = &self.dict.ht[self.table];
                if self.bucket >= t.size() {
                    self.table += 1;
                    self.bucket = 0;
                    continue;
                }
                self.node = t.buckets[self.bucket].as_deref();
                self.bucket += 1;
                if self.node.is_some() {
                    break;
                }
            }
            self.node?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_replace() {
        let mut d: Dict<String, i32> = Dict::new();
        assert_eq!(d.insert("a".into(), 1), None);
        assert_eq!(d.insert("b".into(), 2), None);
        assert_eq!(d.insert("a".into(), 10), Some(1));
        assert_eq!(d.get("a"), Some(&10));
        assert_eq!(d.get("b"), Some(&2));
        assert_eq!(d.get("c"), None);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn add_respects_existing() {
        let mut d: Dict<String, i32> = Dict::new();
        assert!(d.add("k".into(), 1));
        assert!(!d.add("k".into(), 2));
        assert_eq!(d.get("k"), Some(&1));
    }

    #[test]
    fn remove_splices_chain() {
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..64 {
            d.insert(i, i * 10);
        }
        for i in (0..64).step_by(2) {
            assert_eq!(d.remove(&i), Some(i * 10));
        }
        assert_eq!(d.len(), 32);
        for i in 0..64 {
            assert_eq!(d.get(&i).is_some(), i % 2 == 1);
        }
        assert_eq!(d.remove(&999), None);
    }

    #[test]
    fn grows_through_incremental_rehash() {
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..10_000 {
            d.insert(i, i);
        }
        assert_eq!(d.len(), 10_000);
        // Everything stays reachable whether or not migration finished.
        for i in (0..10_000).step_by(7) {
            assert_eq!(d.get(&i), Some(&i));
        }
        // Drain any in-flight rehash and re-check.
        while d.rehash(100) {}
        assert!(!d.is_rehashing());
        for i in 0..10_000 {
            assert_eq!(d.get(&i), Some(&i));
        }
    }

    #[test]
    fn iter_sees_every_entry_exactly_once() {
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..1000 {
            d.insert(i, -i);
        }
        let mut seen: Vec<i64> = d.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn random_entry_is_member() {
        let mut d: Dict<i64, i64> = Dict::new();
        assert!(d.random_entry().is_none());
        for i in 0..100 {
            d.insert(i, i);
        }
        for _ in 0..64 {
            let (k, v) = d.random_entry().unwrap();
            assert_eq!(k, v);
            assert!((0..100).contains(k));
        }
    }

    #[test]
    fn disabled_resize_defers_growth_until_force_ratio() {
        let _guard = RESIZE_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..4 {
            d.insert(i, i);
        }
        while d.rehash(100) {}
        let size_before = d.ht[0].size();

        set_resize_enabled(false);
        // Load factor climbs past 1 without triggering a grow.
        for i in 4..(size_before as i64 * FORCE_RESIZE_RATIO as i64) {
            d.insert(i, i);
        }
        assert_eq!(d.ht[0].size(), size_before);
        // One entry past the force ratio grows regardless.
        let n = size_before as i64 * FORCE_RESIZE_RATIO as i64;
        d.insert(n, n);
        d.insert(n + 1, n + 1);
        assert!(d.capacity() > size_before);
        set_resize_enabled(true);
        while d.rehash(100) {}
        for i in 0..n {
            assert_eq!(d.get(&i), Some(&i));
        }
    }

    #[test]
    fn explicit_resize_shrinks() {
        let _guard = RESIZE_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..1000 {
            d.insert(i, i);
        }
        while d.rehash(1000) {}
        for i in 0..990 {
            d.remove(&i);
        }
        assert!(d.needs_resize());
        d.resize();
        while d.rehash(1000) {}
        assert!(d.ht[0].size() <= 16);
        for i in 990..1000 {
            assert_eq!(d.get(&i), Some(&i));
        }
    }

    #[test]
    fn rehash_millis_bounded() {
        let mut d: Dict<i64, i64> = Dict::new();
        for i in 0..5000 {
            d.insert(i, i);
        }
        // Force a pending rehash, then drain with the timed API.
        d.expand(1 << 14);
        let _ = d.rehash_millis(50);
        for i in 0..5000 {
            assert_eq!(d.get(&i), Some(&i));
        }
    }

    #[test]
    fn borrowed_key_lookup() {
        use crate::sds::Sds;
        let mut d: Dict<Sds, i32> = Dict::new();
        d.insert(Sds::from("key"), 7);
        let probe: &[u8] = b"key";
        assert_eq!(d.get(probe), Some(&7));
    }
}
