#![forbid(unsafe_code)]

use std::fmt;
use std::hash::BuildHasher;
use std::hash::Hash;

use log::warn;
use rustc_hash::FxBuildHasher;

/// Computes the hash that callers of [HashTable] typically pass in.
pub fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    FxBuildHasher.hash_one(value)
}

/// Spreads the entropy of the hash over the low bits, since the bucket index
/// only uses the low bits of the power of two sized table.
fn supplemental_hash(hash: u64) -> u64 {
    let mut h = hash ^ (hash >> 32);
    h ^= (h >> 20) ^ (h >> 12);
    h ^ (h >> 7) ^ (h >> 4)
}

struct Entry<K, V> {
    key: K,
    hash: u64,
    value: V,
    next: Option<usize>,
}

/// Either a live entry or a link in the free list of the entry arena.
enum Slot<K, V> {
    Occupied(Entry<K, V>),
    Vacant { next_free: Option<usize> },
}

/// A chained hash table where the caller supplies the hash of every key and
/// the function that decides equality. Entries live in an arena that recycles
/// removed entries, so tables with a lot of churn do not allocate.
pub struct HashTable<K, V, E = fn(&K, &K) -> bool> {
    entries: Vec<Slot<K, V>>,
    free: Option<usize>,
    buckets: Vec<Option<usize>>,
    len: usize,
    max_load_percent: usize,
    equal: E,
}

/// The number of buckets of a new table.
const INITIAL_BUCKETS: usize = 16;

impl<K, V, E: Fn(&K, &K) -> bool> HashTable<K, V, E> {
    /// Creates a table that doubles whenever the number of entries reaches the
    /// given percentage of the number of buckets.
    pub fn new(max_load_percent: usize, equal: E) -> Self {
        debug_assert!(max_load_percent > 0, "A load percentage of zero never fits an entry");

        Self {
            entries: Vec::new(),
            free: None,
            buckets: vec![None; INITIAL_BUCKETS],
            len: 0,
            max_load_percent,
            equal,
        }
    }

    /// Inserts the value for the given key, returns the previous value when the key was present.
    pub fn put(&mut self, key: K, hash: u64, value: V) -> Option<V> {
        if let Some(index) = self.find(&key, hash) {
            if let Slot::Occupied(entry) = &mut self.entries[index] {
                return Some(std::mem::replace(&mut entry.value, value));
            }
        }

        let bucket = self.bucket(hash);
        let entry = Entry {
            key,
            hash,
            value,
            next: self.buckets[bucket],
        };

        let index = match self.free {
            Some(index) => {
                if let Slot::Vacant { next_free } = self.entries[index] {
                    self.free = next_free;
                }
                self.entries[index] = Slot::Occupied(entry);
                index
            }
            None => {
                self.entries.push(Slot::Occupied(entry));
                self.entries.len() - 1
            }
        };

        self.buckets[bucket] = Some(index);
        self.len += 1;

        if self.len * 100 >= self.buckets.len() * self.max_load_percent {
            self.resize(self.buckets.len() * 2);
        }

        None
    }

    pub fn get(&self, key: &K, hash: u64) -> Option<&V> {
        let index = self.find(key, hash)?;
        match &self.entries[index] {
            Slot::Occupied(entry) => Some(&entry.value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get_mut(&mut self, key: &K, hash: u64) -> Option<&mut V> {
        let index = self.find(key, hash)?;
        match &mut self.entries[index] {
            Slot::Occupied(entry) => Some(&mut entry.value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn contains_key(&self, key: &K, hash: u64) -> bool {
        self.find(key, hash).is_some()
    }

    /// Removes the key, returning its value when it was present.
    pub fn remove(&mut self, key: &K, hash: u64) -> Option<V> {
        let bucket = self.bucket(hash);

        let mut previous: Option<usize> = None;
        let mut current = self.buckets[bucket];
        while let Some(index) = current {
            let Slot::Occupied(entry) = &self.entries[index] else {
                debug_assert!(false, "Hash chain contains a vacant entry");
                return None;
            };

            let next = entry.next;
            if self.matches(entry, key, hash) {
                match previous {
                    None => self.buckets[bucket] = next,
                    Some(previous) => {
                        if let Slot::Occupied(previous) = &mut self.entries[previous] {
                            previous.next = next;
                        }
                    }
                }

                let removed = std::mem::replace(&mut self.entries[index], Slot::Vacant { next_free: self.free });
                self.free = Some(index);
                self.len -= 1;

                return match removed {
                    Slot::Occupied(entry) => Some(entry.value),
                    Slot::Vacant { .. } => None,
                };
            }

            previous = Some(index);
            current = next;
        }

        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of buckets.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Removes all entries, keeping the bucket array.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free = None;
        self.buckets.fill(None);
        self.len = 0;
    }

    /// Consumes the table. The callback receives every entry, so the caller
    /// decides whether the values are released or kept.
    pub fn destroy<F: FnMut(K, V)>(self, mut f: F) {
        for slot in self.entries {
            if let Slot::Occupied(entry) = slot {
                f(entry.key, entry.value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied(entry) => Some((&entry.key, &entry.value)),
            Slot::Vacant { .. } => None,
        })
    }

    fn bucket(&self, hash: u64) -> usize {
        (supplemental_hash(hash) as usize) & (self.buckets.len() - 1)
    }

    /// Keys are compared by identity before the equality function is consulted.
    fn matches(&self, entry: &Entry<K, V>, key: &K, hash: u64) -> bool {
        entry.hash == hash && (std::ptr::eq(&entry.key, key) || (self.equal)(&entry.key, key))
    }

    fn find(&self, key: &K, hash: u64) -> Option<usize> {
        let mut current = self.buckets[self.bucket(hash)];
        while let Some(index) = current {
            match &self.entries[index] {
                Slot::Occupied(entry) => {
                    if self.matches(entry, key, hash) {
                        return Some(index);
                    }
                    current = entry.next;
                }
                Slot::Vacant { .. } => {
                    debug_assert!(false, "Hash chain contains a vacant entry");
                    return None;
                }
            }
        }

        None
    }

    /// Relinks every entry into `size` buckets. When the memory is not
    /// available the current buckets are kept, the table only becomes slower.
    fn resize(&mut self, size: usize) -> bool {
        debug_assert!(size.is_power_of_two(), "The number of buckets {size} must be a power of two");

        let mut buckets = Vec::new();
        if buckets.try_reserve_exact(size).is_err() {
            warn!("Could not resize a hashtable to {size} buckets, continuing with {}", self.buckets.len());
            return false;
        }
        buckets.resize(size, None);
        self.buckets = buckets;

        for index in 0..self.entries.len() {
            if let Slot::Occupied(entry) = &self.entries[index] {
                let bucket = (supplemental_hash(entry.hash) as usize) & (size - 1);
                let next = self.buckets[bucket];
                if let Slot::Occupied(entry) = &mut self.entries[index] {
                    entry.next = next;
                }
                self.buckets[bucket] = Some(index);
            }
        }

        true
    }
}

impl<K: fmt::Debug, V: fmt::Debug, E> fmt::Debug for HashTable<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in &self.entries {
            if let Slot::Occupied(entry) = slot {
                map.entry(&entry.key, &entry.value);
            }
        }
        map.finish()
    }
}
