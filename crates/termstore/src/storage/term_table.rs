#![forbid(unsafe_code)]

use log::trace;
use log::warn;

use crate::Header;
use crate::equal_header;
use crate::storage::BlockAllocator;
use crate::storage::CELL_NEXT;
use crate::storage::NULL;

#[cfg(target_pointer_width = "64")]
fn fold(word: usize) -> usize {
    word ^ (word >> 32)
}

#[cfg(not(target_pointer_width = "64"))]
fn fold(word: usize) -> usize {
    word
}

/// The hash of a cell, computed from its header without the age and mark bits
/// and from the payload words. The children of a cell are canonical, so their
/// addresses identify them.
pub fn hash_cell(header: Header, payload: &[usize]) -> usize {
    payload
        .iter()
        .fold(fold(header.hide_age_mark()), |hash, word| (hash << 1) ^ (hash >> 1) ^ fold(*word))
}

/// The unique table for maximal sharing. Buckets contain the address of the
/// first cell in the chain, the cells themselves link to the next one. The
/// table does not keep cells alive, the sweep removes the cells it frees.
pub struct TermTable {
    buckets: Vec<usize>,
    len: usize,
    max_load_percent: usize,
}

impl TermTable {
    /// Creates a table with `2^class` buckets.
    pub fn new(class: u32, max_load_percent: usize) -> Self {
        Self {
            buckets: vec![NULL; 1 << class],
            len: 0,
            max_load_percent,
        }
    }

    /// Returns the cell with the given header and payload, if it exists.
    pub fn find(&self, blocks: &BlockAllocator, hash: usize, header: Header, payload: &[usize]) -> Option<usize> {
        let mut current = self.buckets[self.bucket(hash)];
        while current != NULL {
            if equal_header(blocks.header(current), header) && blocks.payload(current) == payload {
                return Some(current);
            }

            current = blocks.word(current, CELL_NEXT);
        }

        None
    }

    /// Adds a freshly initialised cell to the table.
    pub fn insert(&mut self, blocks: &mut BlockAllocator, address: usize, hash: usize) {
        let bucket = self.bucket(hash);
        blocks.set_word(address, CELL_NEXT, self.buckets[bucket]);
        self.buckets[bucket] = address;
        self.len += 1;

        if self.len * 100 > self.buckets.len() * self.max_load_percent {
            self.resize(blocks);
        }
    }

    /// Unlinks the cell from its chain, the cell must still contain its original contents.
    pub fn remove(&mut self, blocks: &mut BlockAllocator, address: usize) -> bool {
        let hash = hash_cell(blocks.header(address), blocks.payload(address));
        let bucket = self.bucket(hash);

        let mut previous = NULL;
        let mut current = self.buckets[bucket];
        while current != NULL {
            let next = blocks.word(current, CELL_NEXT);
            if current == address {
                if previous == NULL {
                    self.buckets[bucket] = next;
                } else {
                    blocks.set_word(previous, CELL_NEXT, next);
                }

                self.len -= 1;
                return true;
            }

            previous = current;
            current = next;
        }

        false
    }

    /// The number of cells in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn number_of_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Doubles the number of buckets. When the memory is not available the
    /// current table is kept, it only becomes slower.
    fn resize(&mut self, blocks: &mut BlockAllocator) {
        let size = self.buckets.len() * 2;

        let mut buckets = Vec::new();
        if buckets.try_reserve_exact(size).is_err() {
            warn!("Could not resize the term table to {size} buckets, continuing with {}", self.buckets.len());
            return;
        }
        buckets.resize(size, NULL);

        let old = std::mem::replace(&mut self.buckets, buckets);
        for head in old {
            let mut current = head;
            while current != NULL {
                let next = blocks.word(current, CELL_NEXT);
                let bucket = self.bucket(hash_cell(blocks.header(current), blocks.payload(current)));
                blocks.set_word(current, CELL_NEXT, self.buckets[bucket]);
                self.buckets[bucket] = current;
                current = next;
            }
        }

        trace!("Resized the term table to {size} buckets for {} terms", self.len);
    }

    fn bucket(&self, hash: usize) -> usize {
        hash & (self.buckets.len() - 1)
    }
}
