#![forbid(unsafe_code)]

use log::error;
use log::trace;

use crate::StoreConfig;
use crate::TermId;
use crate::TermStoreError;

/// A handle to a protected block. Handles of released blocks are rejected,
/// even when their slot has been reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProtectedBlock {
    index: usize,
    generation: u64,
}

struct InUse {
    generation: u64,
    slots: Vec<Option<TermId>>,

    /// The number of slots, from the start, that are roots.
    protected: usize,
}

enum Entry {
    InUse(InUse),
    Released,
}

/// Arrays of term slots that are owned by client code and that are roots of
/// every collection. Released arrays are cached and handed out again by size.
pub struct ProtectedBlockAllocator {
    blocks: Vec<Entry>,
    free_handles: Vec<usize>,
    unused: Vec<Vec<Option<TermId>>>,
    generation: u64,

    min_block_size: usize,
    max_unused: usize,
    low_memory: bool,
}

impl ProtectedBlockAllocator {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            blocks: Vec::new(),
            free_handles: Vec::new(),
            unused: Vec::new(),
            generation: 0,
            min_block_size: config.min_protected_block_size,
            max_unused: config.max_unused_protected_blocks,
            low_memory: config.low_memory,
        }
    }

    /// Returns a block with at least `min_size` slots of which the first
    /// `min_size` are protected and empty.
    pub fn acquire(&mut self, min_size: usize, max_size: usize) -> Result<ProtectedBlock, TermStoreError> {
        debug_assert!(min_size <= max_size, "Minimum size {min_size} exceeds the maximum {max_size}");

        let mut slots = self.storage(min_size, max_size)?;
        slots.fill(None);

        self.generation += 1;
        let block = InUse {
            generation: self.generation,
            slots,
            protected: min_size,
        };

        let index = match self.free_handles.pop() {
            Some(index) => {
                self.blocks[index] = Entry::InUse(block);
                index
            }
            None => {
                self.blocks.push(Entry::InUse(block));
                self.blocks.len() - 1
            }
        };

        Ok(ProtectedBlock {
            index,
            generation: self.generation,
        })
    }

    /// Changes the protected size to `min_size`. The protected contents are
    /// kept and newly exposed slots are empty. When the block is too small its
    /// contents move to a block with room for up to `max_size` slots.
    pub fn resize(
        &mut self,
        handle: ProtectedBlock,
        min_size: usize,
        max_size: usize,
    ) -> Result<ProtectedBlock, TermStoreError> {
        debug_assert!(min_size <= max_size, "Minimum size {min_size} exceeds the maximum {max_size}");

        let capacity = self.block(handle)?.slots.len();
        if capacity < min_size {
            let mut slots = self.storage(min_size, max_size)?;
            slots.fill(None);

            let block = self.block_mut(handle)?;
            slots[..block.protected].copy_from_slice(&block.slots[..block.protected]);
            let old = std::mem::replace(&mut block.slots, slots);
            self.cache(old);
        }

        let block = self.block_mut(handle)?;
        if min_size > block.protected {
            block.slots[block.protected..min_size].fill(None);
        }
        block.protected = min_size;

        Ok(handle)
    }

    /// Makes sure that at least `size` slots are protected.
    pub fn grow(&mut self, handle: ProtectedBlock, size: usize) -> Result<ProtectedBlock, TermStoreError> {
        if size > self.block(handle)?.protected {
            let max_size = size.checked_mul(2).ok_or(TermStoreError::OutOfMemory { size_class: size })?;
            self.resize(handle, size, max_size)
        } else {
            Ok(handle)
        }
    }

    /// Gives the block back. Releasing a block twice is a programming error.
    pub fn release(&mut self, handle: ProtectedBlock) -> Result<(), TermStoreError> {
        if self.block(handle).is_err() {
            error!("Protected block {handle:?} released twice, or it does not belong to this store");
            debug_assert!(false, "Protected block {handle:?} is not in use");
            return Err(TermStoreError::InvalidBlockHandle);
        }

        if let Entry::InUse(block) = std::mem::replace(&mut self.blocks[handle.index], Entry::Released) {
            self.cache(block.slots);
        }

        self.free_handles.push(handle.index);
        Ok(())
    }

    /// The protected slots of the block.
    pub fn slots(&self, handle: ProtectedBlock) -> Result<&[Option<TermId>], TermStoreError> {
        let block = self.block(handle)?;
        Ok(&block.slots[..block.protected])
    }

    pub fn slots_mut(&mut self, handle: ProtectedBlock) -> Result<&mut [Option<TermId>], TermStoreError> {
        let block = self.block_mut(handle)?;
        Ok(&mut block.slots[..block.protected])
    }

    /// The number of slots that the block can hold without moving.
    pub fn capacity(&self, handle: ProtectedBlock) -> Result<usize, TermStoreError> {
        Ok(self.block(handle)?.slots.len())
    }

    /// Calls the function for every term in the protected part of every block.
    pub fn for_each_term<F: FnMut(TermId)>(&self, mut f: F) {
        for entry in &self.blocks {
            if let Entry::InUse(block) = entry {
                block.slots[..block.protected].iter().flatten().copied().for_each(&mut f);
            }
        }
    }

    /// The number of blocks in use.
    pub fn len(&self) -> usize {
        self.blocks.len() - self.free_handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of released blocks kept for reuse.
    pub fn number_of_unused(&self) -> usize {
        self.unused.len()
    }

    /// Takes the best fitting cached storage, or allocates new storage with
    /// room to grow.
    fn storage(&mut self, min_size: usize, max_size: usize) -> Result<Vec<Option<TermId>>, TermStoreError> {
        let best = self
            .unused
            .iter()
            .enumerate()
            .filter(|(_, slots)| slots.len() >= min_size)
            .min_by_key(|(_, slots)| slots.len().abs_diff(max_size))
            .map(|(index, _)| index);

        if let Some(index) = best {
            return Ok(self.unused.swap_remove(index));
        }

        let size = if self.low_memory {
            min_size
        } else {
            max_size
                .checked_add(max_size.saturating_sub(min_size) / 2)
                .ok_or(TermStoreError::OutOfMemory { size_class: max_size })?
                .max(self.min_block_size)
        };

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(size)
            .map_err(|_| TermStoreError::OutOfMemory { size_class: size })?;
        slots.resize(size, None);

        trace!("Allocated a protected block of {size} slots");
        Ok(slots)
    }

    fn cache(&mut self, slots: Vec<Option<TermId>>) {
        if !self.low_memory && self.unused.len() < self.max_unused {
            self.unused.push(slots);
        }
    }

    fn block(&self, handle: ProtectedBlock) -> Result<&InUse, TermStoreError> {
        match self.blocks.get(handle.index) {
            Some(Entry::InUse(block)) if block.generation == handle.generation => Ok(block),
            _ => Err(TermStoreError::InvalidBlockHandle),
        }
    }

    fn block_mut(&mut self, handle: ProtectedBlock) -> Result<&mut InUse, TermStoreError> {
        match self.blocks.get_mut(handle.index) {
            Some(Entry::InUse(block)) if block.generation == handle.generation => Ok(block),
            _ => Err(TermStoreError::InvalidBlockHandle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> ProtectedBlockAllocator {
        ProtectedBlockAllocator::new(&StoreConfig::default())
    }

    #[test]
    fn test_grow_keeps_contents() {
        let mut blocks = allocator();

        let handle = blocks.acquire(2, 10).unwrap();
        assert_eq!(blocks.slots(handle).unwrap().len(), 2);

        let slots = blocks.slots_mut(handle).unwrap();
        slots[0] = Some(TermId::new(8));
        slots[1] = Some(TermId::new(16));

        let handle = blocks.grow(handle, 5).unwrap();
        let slots = blocks.slots(handle).unwrap();
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0], Some(TermId::new(8)));
        assert_eq!(slots[1], Some(TermId::new(16)));
        assert_eq!(&slots[2..5], &[None, None, None]);
    }

    #[test]
    fn test_shrink_then_grow_clears() {
        let mut blocks = allocator();

        let handle = blocks.acquire(4, 4).unwrap();
        blocks.slots_mut(handle).unwrap().fill(Some(TermId::new(8)));

        let handle = blocks.resize(handle, 1, 4).unwrap();
        let handle = blocks.resize(handle, 4, 4).unwrap();
        assert_eq!(blocks.slots(handle).unwrap(), &[Some(TermId::new(8)), None, None, None]);
    }

    #[test]
    fn test_resize_moves_storage() {
        let config = StoreConfig {
            min_protected_block_size: 1,
            ..StoreConfig::default()
        };
        let mut blocks = ProtectedBlockAllocator::new(&config);

        let handle = blocks.acquire(1, 2).unwrap();
        assert_eq!(blocks.capacity(handle).unwrap(), 2);
        blocks.slots_mut(handle).unwrap()[0] = Some(TermId::new(8));

        let handle = blocks.resize(handle, 10, 20).unwrap();
        assert!(blocks.capacity(handle).unwrap() >= 20);
        assert_eq!(blocks.slots(handle).unwrap()[0], Some(TermId::new(8)));
        assert_eq!(blocks.number_of_unused(), 1, "The old storage is cached");
    }

    #[test]
    fn test_release_reuses_best_fit() {
        let mut blocks = allocator();

        let small = blocks.acquire(300, 300).unwrap();
        let large = blocks.acquire(1000, 1000).unwrap();
        blocks.release(small).unwrap();
        blocks.release(large).unwrap();
        assert_eq!(blocks.number_of_unused(), 2);

        let handle = blocks.acquire(200, 400).unwrap();
        assert_eq!(blocks.capacity(handle).unwrap(), 300);
        assert!(blocks.slots(handle).unwrap().iter().all(Option::is_none));

        // The handle of a released block is rejected.
        assert!(matches!(blocks.slots(small), Err(TermStoreError::InvalidBlockHandle)));
    }

    #[test]
    fn test_low_memory_frees_immediately() {
        let mut blocks = ProtectedBlockAllocator::new(&StoreConfig::low_memory());

        let handle = blocks.acquire(3, 100).unwrap();
        assert_eq!(blocks.capacity(handle).unwrap(), 3);

        blocks.release(handle).unwrap();
        assert_eq!(blocks.number_of_unused(), 0);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_huge_sizes_are_out_of_memory() {
        let mut blocks = allocator();

        assert!(matches!(
            blocks.acquire(1, usize::MAX),
            Err(TermStoreError::OutOfMemory { .. })
        ));
        assert!(matches!(
            blocks.acquire(usize::MAX / 2, usize::MAX / 2),
            Err(TermStoreError::OutOfMemory { .. })
        ));

        let handle = blocks.acquire(2, 2).unwrap();
        blocks.slots_mut(handle).unwrap()[1] = Some(TermId::new(8));
        assert!(matches!(
            blocks.grow(handle, usize::MAX / 2 + 1),
            Err(TermStoreError::OutOfMemory { .. })
        ));

        // A failed grow leaves the block as it was.
        assert_eq!(blocks.slots(handle).unwrap(), &[None, Some(TermId::new(8))]);
        assert_eq!(blocks.number_of_unused(), 0);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_double_release() {
        let mut blocks = allocator();
        let handle = blocks.acquire(1, 1).unwrap();

        blocks.release(handle).unwrap();
        assert!(matches!(blocks.release(handle), Err(TermStoreError::InvalidBlockHandle)));
    }
}
