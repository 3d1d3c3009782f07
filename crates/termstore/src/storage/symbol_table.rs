#![forbid(unsafe_code)]

use log::trace;

use crate::MAX_HEADER_VALUE;
use crate::SymbolId;
use crate::TermStoreError;
use crate::storage::HashTable;
use crate::storage::hash_of;

/// A live symbol.
struct SymbolEntry {
    name: String,
    arity: usize,
    quoted: bool,

    /// The address of the cell that carries the mark of this symbol.
    cell: usize,

    hash: u64,

    /// The next symbol in the same bucket.
    next: Option<usize>,
}

/// An entry of the lookup table, the ids of free entries form a list.
enum Slot {
    Live(SymbolEntry),
    Free { next: Option<usize> },
}

/// Interns (name, arity, quoted) triples into small integer ids. The id of a
/// symbol is its index in the lookup table.
pub struct SymbolTable {
    slots: Vec<Slot>,
    free: Option<usize>,
    buckets: Vec<Option<usize>>,
    len: usize,

    /// The largest number of symbols that can be alive.
    limit: usize,

    /// Counters for the generation of fresh names per registered prefix.
    prefixes: HashTable<String, usize>,
}

fn symbol_hash(name: &str, arity: usize) -> u64 {
    hash_of(&(name, arity))
}

impl SymbolTable {
    /// Creates a table with room for `2^class` symbols.
    pub fn new(class: u32) -> Self {
        Self::with_limit(class, MAX_HEADER_VALUE.saturating_add(1))
    }

    /// Creates a table that never holds more than `limit` symbols.
    pub fn with_limit(class: u32, limit: usize) -> Self {
        let size = (1usize << class).min(limit);
        let equal: fn(&String, &String) -> bool = |a, b| a == b;

        let mut table = Self {
            slots: Vec::with_capacity(size),
            free: None,
            buckets: vec![None; size.next_power_of_two()],
            len: 0,
            limit,
            prefixes: HashTable::new(75, equal),
        };
        table.extend_free_list(size);
        table
    }

    /// Returns the id of the given symbol if it exists.
    pub fn lookup(&self, name: &str, arity: usize, quoted: bool) -> Option<SymbolId> {
        let hash = symbol_hash(name, arity);
        let mut current = self.buckets[self.bucket(hash)];

        while let Some(index) = current {
            let entry = self.entry(index);
            if entry.hash == hash && entry.arity == arity && entry.quoted == quoted && entry.name == name {
                return Some(SymbolId::new(index));
            }
            current = entry.next;
        }

        None
    }

    /// Makes sure that [SymbolTable::insert] can take an id, growing the
    /// table when the free list is exhausted.
    pub fn reserve(&mut self) -> Result<(), TermStoreError> {
        if self.free.is_some() {
            return Ok(());
        }

        let size = self.slots.len();
        if size >= self.limit {
            return Err(TermStoreError::SymbolCapacityExceeded { limit: self.limit });
        }

        let new_size = (size * 2).max(1).min(self.limit);
        self.slots
            .try_reserve_exact(new_size - size)
            .map_err(|_| TermStoreError::OutOfMemory { size_class: 0 })?;

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(new_size.next_power_of_two())
            .map_err(|_| TermStoreError::OutOfMemory { size_class: 0 })?;
        buckets.resize(new_size.next_power_of_two(), None);

        // Everything is allocated, the rehash can no longer fail.
        self.buckets = buckets;
        for index in 0..self.slots.len() {
            if let Slot::Live(entry) = &self.slots[index] {
                let bucket = self.bucket(entry.hash);
                let next = self.buckets[bucket];
                if let Slot::Live(entry) = &mut self.slots[index] {
                    entry.next = next;
                }
                self.buckets[bucket] = Some(index);
            }
        }

        self.extend_free_list(new_size - size);
        trace!("Symbol table grew from {size} to {new_size} entries");
        Ok(())
    }

    /// Adds a new symbol, [SymbolTable::reserve] must have succeeded before.
    pub fn insert(&mut self, name: &str, arity: usize, quoted: bool, cell: usize) -> SymbolId {
        debug_assert!(self.lookup(name, arity, quoted).is_none(), "Symbol {name} already exists");

        let Some(index) = self.free else {
            panic!("No symbol id was reserved before inserting {name}");
        };

        if let Slot::Free { next } = self.slots[index] {
            self.free = next;
        }

        let hash = symbol_hash(name, arity);
        let bucket = self.bucket(hash);
        self.slots[index] = Slot::Live(SymbolEntry {
            name: name.to_string(),
            arity,
            quoted,
            cell,
            hash,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(index);
        self.len += 1;

        self.update_prefix(name);
        SymbolId::new(index)
    }

    /// Removes the symbol and makes its id available again. Only the sweep
    /// releases symbols, after it determined that they are unreachable.
    pub fn release(&mut self, id: SymbolId) {
        let index = id.index();
        let hash = self.entry(index).hash;
        let bucket = self.bucket(hash);

        let mut previous: Option<usize> = None;
        let mut current = self.buckets[bucket];
        while let Some(candidate) = current {
            let next = self.entry(candidate).next;
            if candidate == index {
                match previous {
                    None => self.buckets[bucket] = next,
                    Some(previous) => {
                        if let Slot::Live(entry) = &mut self.slots[previous] {
                            entry.next = next;
                        }
                    }
                }
                break;
            }

            previous = Some(candidate);
            current = next;
        }

        debug_assert!(current.is_some(), "Symbol {index} was not found in its bucket");

        self.slots[index] = Slot::Free { next: self.free };
        self.free = Some(index);
        self.len -= 1;
    }

    pub fn is_live(&self, id: SymbolId) -> bool {
        matches!(self.slots.get(id.index()), Some(Slot::Live(_)))
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.entry(id.index()).name
    }

    pub fn arity(&self, id: SymbolId) -> usize {
        self.entry(id.index()).arity
    }

    pub fn is_quoted(&self, id: SymbolId) -> bool {
        self.entry(id.index()).quoted
    }

    /// The address of the cell that represents the symbol during collection.
    pub fn cell(&self, id: SymbolId) -> usize {
        self.entry(id.index()).cell
    }

    /// The number of live symbols.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of ids, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the ids of all live symbols.
    pub fn iter(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Live(_) => Some(SymbolId::new(index)),
            Slot::Free { .. } => None,
        })
    }

    /// Registers a prefix for fresh names, the counter starts after the largest
    /// numeric suffix of the existing symbols with that prefix.
    pub fn register_prefix(&mut self, prefix: &str) {
        let hash = hash_of(prefix);
        if self.prefixes.contains_key(&prefix.to_string(), hash) {
            return;
        }

        let mut counter = 0;
        for slot in &self.slots {
            if let Slot::Live(entry) = slot {
                if let Some(number) = numeric_suffix(&entry.name, prefix) {
                    counter = counter.max(number.saturating_add(1));
                }
            }
        }

        self.prefixes.put(prefix.to_string(), hash, counter);
    }

    pub fn remove_prefix(&mut self, prefix: &str) {
        self.prefixes.remove(&prefix.to_string(), hash_of(prefix));
    }

    /// Returns a name that starts with the prefix and that no symbol created
    /// since the registration of the prefix has used. Fails when the counter
    /// of the prefix has reached `usize::MAX`.
    pub fn fresh_name(&mut self, prefix: &str) -> Result<String, TermStoreError> {
        self.register_prefix(prefix);

        let key = prefix.to_string();
        let hash = hash_of(prefix);
        let counter = self.prefixes.get(&key, hash).copied().unwrap_or_default();
        let next = counter.checked_add(1).ok_or_else(|| TermStoreError::FreshNamesExhausted(key.clone()))?;
        self.prefixes.put(key, hash, next);

        Ok(format!("{prefix}{counter}"))
    }

    /// Bumps the counter of a registered prefix past the suffix of the new name.
    fn update_prefix(&mut self, name: &str) {
        let start_of_index = name.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |pos| pos + 1);
        if start_of_index == name.len() || self.prefixes.is_empty() {
            return;
        }

        let prefix = &name[..start_of_index];
        if let Ok(number) = name[start_of_index..].parse::<usize>() {
            if let Some(counter) = self.prefixes.get_mut(&prefix.to_string(), hash_of(prefix)) {
                *counter = (*counter).max(number.saturating_add(1));
            }
        }
    }

    fn entry(&self, index: usize) -> &SymbolEntry {
        match &self.slots[index] {
            Slot::Live(entry) => entry,
            Slot::Free { .. } => panic!("Symbol {index} is not alive"),
        }
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Appends free slots, the lowest id ends up at the head of the free list.
    fn extend_free_list(&mut self, count: usize) {
        let start = self.slots.len();
        for index in start..start + count {
            let next = if index + 1 < start + count { Some(index + 1) } else { self.free };
            self.slots.push(Slot::Free { next });
        }

        if count > 0 {
            self.free = Some(start);
        }
    }
}

fn numeric_suffix(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.parse::<usize>().ok()
}
